// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Admission control for pixel buffer allocation against a global byte
//! ceiling, with a ledger of live buffers and a periodic diagnostic task.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: the ceiling, parsed from strings like `"2G"`.
//! - [`MemoryManager`]: issues tracked [`PixelBuffer`]s, refuses requests
//!   that would exceed the ceiling, and force-closes leaks at shutdown.
//! - [`Reservation`]: working memory that is not a buffer, held against the
//!   same ceiling until dropped.
//! - [`MonitorConfig`] / [`DiagnosticsReport`]: the background task that
//!   logs usage, flags long-lived buffers, and forces reclamation under
//!   pressure.
//! - [`AllocationStats`]: cumulative counters.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryManager::allocate(rows, cols, format, tag)
//!       │   used += size, ledger[id] = {tag, size, created}
//!       ▼
//!   PixelBuffer  ◄─── holds Arc<ManagerInner> as its ReleaseTracker
//!       │
//!       │  close() / release() / drop
//!       ▼
//!   ManagerInner::on_release(id, storage)
//!       │   used −= size, ledger.remove(id)
//!       ▼
//!   reuse cache
//! ```
//!
//! [`PixelBuffer`]: pixel_buffer::PixelBuffer

mod budget;
mod error;
mod manager;
mod monitor;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use manager::{AllocationInfo, MemoryManager, ReclaimReport, Reservation};
pub use monitor::{DiagnosticsReport, MonitorConfig};
pub use stats::AllocationStats;
