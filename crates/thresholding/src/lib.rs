// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # thresholding
//!
//! Binarization algorithms over [`pixel_buffer::PixelBuffer`]s, with every
//! intermediate buffer allocated through a
//! [`memory_manager::MemoryManager`].
//!
//! # Key Components
//!
//! - [`Thresholder`]: the capability every algorithm implements.
//! - [`Algorithm`]: the closed set of algorithms ([`Otsu2D`],
//!   [`IterativeTriclass`]).
//! - [`ParameterSet`] / [`ParameterSchema`]: untyped parameters checked
//!   against a per-algorithm schema before processing starts.
//! - [`ProcessingContext`]: cancellation token, deadline, and stage
//!   observer polled between stages.
//! - [`AlgorithmRegistry`]: current selection and stored parameters.
//!
//! # Example
//!
//! ```
//! use memory_manager::{MemoryBudget, MemoryManager};
//! use pixel_buffer::{PixelBuffer, PixelFormat};
//! use thresholding::{Algorithm, ParameterSet, ProcessingContext, Thresholder};
//!
//! let memory = MemoryManager::new(MemoryBudget::from_mb(16));
//! let data = (0..64 * 64).map(|k| if k % 64 < 32 { 30 } else { 220 }).collect();
//! let input = PixelBuffer::from_vec(64, 64, PixelFormat::Gray8, data).unwrap();
//!
//! let params = ParameterSet::new().with("window_size", 5);
//! let out = Algorithm::Otsu2D
//!     .process(&input, &params, &ProcessingContext::new(), &memory)
//!     .unwrap();
//! assert_eq!(out.image.get(10, 60).unwrap(), 255);
//! ```

mod algorithm;
mod context;
mod error;
pub mod histogram;
mod params;
mod registry;

pub use algorithm::{
    Algorithm, AlgorithmReport, ConvergenceHistory, InitialThresholdMethod, IterationRecord,
    IterativeTriclass, Otsu2D, Otsu2DParams, Otsu2DReport, StopReason, ThresholdOutput,
    Thresholder, TriclassParams, TriclassReport, OTSU2D_SCHEMA, TRICLASS_SCHEMA,
};
pub use context::{CancelToken, ProcessingContext, Stage};
pub use error::{AlgorithmError, CancelReason, ValidationError};
pub use params::{
    DefaultValue, ParamKind, ParamSpec, ParamValue, ParameterSchema, ParameterSet,
    ValidatedParams,
};
pub use registry::AlgorithmRegistry;
