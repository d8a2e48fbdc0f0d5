// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for pixel buffer access and kernels.

use crate::{BufferId, PixelFormat};

/// Errors that can occur when creating, accessing, or transforming a buffer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    /// A coordinate lies outside the buffer.
    #[error("{op}: coordinate ({row}, {col}) out of bounds for {rows}x{cols} buffer")]
    Bounds {
        op: &'static str,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// A channel index is not present in the buffer's pixel format.
    #[error("{op}: channel {channel} out of range for {format} buffer")]
    ChannelOutOfRange {
        op: &'static str,
        channel: usize,
        format: PixelFormat,
    },

    /// The buffer was closed, or is empty.
    #[error("{op}: invalid buffer {id}: {reason}")]
    Invalid {
        op: &'static str,
        id: BufferId,
        reason: &'static str,
    },

    /// Requested dimensions are zero or exceed the per-axis maximum.
    #[error("invalid dimensions {rows}x{cols} (each axis must be in 1..={max})")]
    InvalidDimensions { rows: usize, cols: usize, max: usize },

    /// Supplied storage does not match the buffer geometry.
    #[error("data size mismatch: expected {expected} bytes, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    /// Two buffers have incompatible geometry or format for an operation.
    #[error("{op}: incompatible buffers {lhs} vs {rhs}")]
    Incompatible {
        op: &'static str,
        lhs: String,
        rhs: String,
    },

    /// Source and destination are the same buffer.
    #[error("{op}: source and destination alias buffer {id}")]
    Aliased { op: &'static str, id: BufferId },

    /// A kernel parameter is outside what the kernel supports.
    #[error("{op}: unsupported kernel parameter: {detail}")]
    Kernel { op: &'static str, detail: String },
}
