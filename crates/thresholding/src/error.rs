// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for parameter validation and algorithm execution.

use crate::{ParamValue, Stage};
use memory_manager::MemoryError;
use pixel_buffer::BufferError;
use std::fmt;

/// A parameter map failed its schema. Raised before any processing begins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The value has the right type but lies outside the declared domain.
    #[error("{algorithm}: parameter '{name}' = {value} is out of range (expected {expected})")]
    OutOfRange {
        algorithm: &'static str,
        name: String,
        value: ParamValue,
        expected: String,
    },

    /// The value has the wrong scalar type.
    #[error("{algorithm}: parameter '{name}' = {value} has type {actual}, expected {expected}")]
    WrongType {
        algorithm: &'static str,
        name: String,
        value: ParamValue,
        actual: &'static str,
        expected: &'static str,
    },

    /// The name is not part of the algorithm's schema.
    #[error("{algorithm}: unknown parameter '{name}'")]
    UnknownParameter { algorithm: &'static str, name: String },
}

/// Why a [`ProcessingContext`](crate::ProcessingContext) stopped a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CancelReason {
    /// [`CancelToken::cancel`](crate::CancelToken::cancel) was called.
    Requested,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("cancellation requested"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors returned by an algorithm invocation.
///
/// Every variant raised mid-pipeline carries the [`Stage`] it came from.
#[derive(Debug, thiserror::Error)]
pub enum AlgorithmError {
    /// Parameters were rejected before processing started.
    #[error("invalid parameters: {0}")]
    Validation(#[from] ValidationError),

    /// The context was cancelled or timed out between stages.
    #[error("cancelled at stage '{stage}': {reason}")]
    Cancelled { stage: Stage, reason: CancelReason },

    /// A buffer access or kernel failed.
    #[error("buffer error at stage '{stage}': {source}")]
    Buffer {
        stage: Stage,
        #[source]
        source: BufferError,
    },

    /// An allocation was denied.
    #[error("memory error at stage '{stage}': {source}")]
    Memory {
        stage: Stage,
        #[source]
        source: MemoryError,
    },

    /// The identifier names no registered algorithm.
    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),
}

impl AlgorithmError {
    /// The stage the error was raised in, if it was raised mid-pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Cancelled { stage, .. } | Self::Buffer { stage, .. } | Self::Memory { stage, .. } => {
                Some(*stage)
            }
            Self::Validation(_) | Self::UnknownAlgorithm(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True when the root cause is the memory ceiling.
    pub fn is_memory_exhausted(&self) -> bool {
        matches!(
            self,
            Self::Memory {
                source: MemoryError::Exhausted { .. },
                ..
            }
        )
    }
}

/// Attaches a [`Stage`] to buffer and memory errors.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, AlgorithmError>;
}

impl<T> AtStage<T> for Result<T, BufferError> {
    fn at(self, stage: Stage) -> Result<T, AlgorithmError> {
        self.map_err(|source| AlgorithmError::Buffer { stage, source })
    }
}

impl<T> AtStage<T> for Result<T, MemoryError> {
    fn at(self, stage: Stage) -> Result<T, AlgorithmError> {
        self.map_err(|source| AlgorithmError::Memory { stage, source })
    }
}
