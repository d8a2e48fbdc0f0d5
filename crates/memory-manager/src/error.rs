// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

use pixel_buffer::{BufferError, BufferId};

/// Errors that can occur during buffer allocation and release.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The allocation would push live bytes past the ceiling, even after a
    /// reclamation pass.
    #[error("memory exhausted: requested {requested} bytes with {used} of {ceiling} bytes in use")]
    Exhausted { requested: u64, used: u64, ceiling: u64 },

    /// A budget string could not be parsed.
    #[error("invalid memory budget '{input}': {reason}")]
    InvalidBudget { input: String, reason: String },

    /// The buffer could not be created (bad dimensions, size mismatch).
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A release named a buffer this manager never issued.
    #[error("buffer {id} is not tracked by this manager")]
    Untracked { id: BufferId },

    /// The manager has been shut down and no longer issues buffers.
    #[error("memory manager has been shut down")]
    ShutDown,

    /// The diagnostic monitor could not be started.
    #[error("cannot start memory monitor: {0}")]
    Monitor(String),
}
