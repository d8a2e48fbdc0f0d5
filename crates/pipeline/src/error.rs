// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the processing pipeline.

use std::path::PathBuf;

/// Errors surfaced by the coordinator, codecs, configuration, and quality
/// evaluation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The algorithm failed; carries the stage it failed in.
    #[error("algorithm error: {0}")]
    Algorithm(#[from] thresholding::AlgorithmError),

    #[error("memory error: {0}")]
    Memory(#[from] memory_manager::MemoryError),

    #[error("buffer error: {0}")]
    Buffer(#[from] pixel_buffer::BufferError),

    /// The input bytes could not be decoded as an image.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error ({format}): {detail}")]
    Encode { format: &'static str, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// `process` or `save` was called before the data it needs exists.
    #[error("no image loaded")]
    NoImageLoaded,

    #[error("no processed result available")]
    NoResult,

    #[error("dimension mismatch: expected {expected_rows}x{expected_cols}, got {actual_rows}x{actual_cols}")]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking processing task panicked or was aborted.
    #[error("processing task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// True when the failure came from cancellation or a deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Algorithm(e) if e.is_cancelled())
    }
}
