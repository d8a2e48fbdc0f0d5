// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # pixel-buffer
//!
//! Thread-safe, explicitly closable 8-bit pixel buffers and the image
//! kernels the binarization algorithms are built from.
//!
//! # Key Components
//!
//! - [`PixelBuffer`]: an exclusively-owned 2D array of 1/3/4-channel `u8`
//!   samples behind a read/write lock. Closing is a single atomic
//!   compare-and-swap, so storage is released exactly once no matter how
//!   many threads race to close it.
//! - [`ReleaseTracker`]: the hook an allocator installs to be told (and
//!   handed the storage) when a buffer is closed.
//! - [`BufferHandle`]: a weak reference that lets an allocator force-close
//!   buffers it does not own.
//! - [`ops`]: grayscale conversion, Gaussian/median/box filters, elliptical
//!   morphology, CLAHE, and summed-area tables.
//!
//! # Example
//! ```
//! use pixel_buffer::{ops, PixelBuffer, PixelFormat};
//!
//! let rgb = PixelBuffer::from_vec(1, 2, PixelFormat::Rgb8, vec![255, 255, 255, 0, 0, 0]).unwrap();
//! let gray = PixelBuffer::new(1, 2, PixelFormat::Gray8).unwrap();
//! ops::to_grayscale(&rgb, &gray).unwrap();
//! assert_eq!(gray.to_vec().unwrap(), vec![255, 0]);
//! ```

mod buffer;
mod error;
mod format;
pub mod ops;

pub use buffer::{
    validate_dimensions, BufferHandle, BufferId, PixelBuffer, ReleaseTracker, MAX_DIMENSION,
};
pub use error::BufferError;
pub use format::PixelFormat;
