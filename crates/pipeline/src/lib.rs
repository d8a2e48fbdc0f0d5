// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pipeline
//!
//! The orchestrator that turns encoded images into binarized ones.
//!
//! The pipeline takes:
//! - Encoded bytes, decoded through a [`Decoder`].
//! - An algorithm and its parameters from a `thresholding::AlgorithmRegistry`.
//! - A budget enforced by a `memory_manager::MemoryManager`.
//!
//! And produces a binary buffer, a display image, and [`ProcessingMetrics`],
//! which an [`Encoder`] can serialise as PNG or JPEG.
//!
//! # Async Execution
//! [`Coordinator::process`] runs the CPU-bound algorithm on tokio's
//! blocking pool so the caller's runtime stays responsive, and enforces the
//! optional processing timeout with `tokio::time::timeout`.
//!
//! # Quality
//! [`quality::evaluate`] compares a result with a ground-truth image
//! (F-measure, pseudo-F, NRM, DRD, PBC).

pub mod codec;
mod config;
mod coordinator;
mod error;
pub mod metrics;
pub mod quality;

pub use codec::{Decoder, Encoder, ImageCodec, OutputFormat};
pub use config::PipelineConfig;
pub use coordinator::{Coordinator, ProcessedImage};
pub use error::PipelineError;
pub use metrics::ProcessingMetrics;
pub use quality::{ConfusionMatrix, QualityReport};
