// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budget-enforced buffer allocation with a live-buffer ledger.
//!
//! The [`MemoryManager`]:
//!
//! 1. Admits an allocation only if `used + requested ≤ ceiling`, forcing one
//!    reclamation pass before refusing with [`MemoryError::Exhausted`].
//! 2. Registers every issued buffer as `{id, tag, size, created}` and keeps
//!    `used` equal to the sum of registered sizes plus outstanding
//!    [`Reservation`]s.
//! 3. Installs itself as the buffer's [`ReleaseTracker`], so closing a buffer
//!    (explicitly, through [`release`], or by dropping it) unregisters it
//!    and returns its storage to a small reuse cache.
//! 4. Force-closes whatever is still registered at [`shutdown`].
//!
//! Working memory that is not a [`PixelBuffer`] (filter passes, prefix-sum
//! tables) is admitted the same way through [`reserve`] and held until the
//! returned [`Reservation`] drops.
//!
//! The check-and-increment and the unregister-and-decrement both happen
//! under one ledger lock, so concurrent allocations can never overshoot the
//! ceiling.
//!
//! [`release`]: MemoryManager::release
//! [`shutdown`]: MemoryManager::shutdown
//! [`reserve`]: MemoryManager::reserve

use crate::monitor::MonitorHandle;
use crate::{AllocationStats, MemoryBudget, MemoryError};
use parking_lot::Mutex;
use pixel_buffer::{
    validate_dimensions, BufferHandle, BufferId, PixelBuffer, PixelFormat, ReleaseTracker,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Smallest storage bucket in the reuse cache: 4 KiB.
const MIN_SIZE_CLASS: usize = 4096;

/// Returned storage kept per size class.
const MAX_CACHED_PER_CLASS: usize = 4;

/// One registered live buffer.
struct Allocation {
    tag: String,
    size: u64,
    created: Instant,
    handle: BufferHandle,
}

/// One outstanding working-memory reservation.
struct Reserved {
    tag: String,
    size: u64,
}

/// Public view of a registered buffer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AllocationInfo {
    pub id: BufferId,
    pub tag: String,
    pub size_bytes: u64,
    pub age: Duration,
}

/// What a reclamation pass freed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReclaimReport {
    /// Registrations dropped because their buffer was already gone.
    pub stale_entries: usize,
    /// Live bytes recovered from those registrations.
    pub stale_bytes: u64,
    /// Cached storage returned to the allocator.
    pub cache_bytes: usize,
}

#[derive(Default)]
struct Ledger {
    used: u64,
    entries: HashMap<BufferId, Allocation>,
    reservations: HashMap<u64, Reserved>,
    next_reservation: u64,
    reserved: u64,
    cache: HashMap<usize, Vec<Vec<u8>>>,
    cache_bytes: usize,
    shut_down: bool,
}

impl Ledger {
    fn take_cached(&mut self, size: usize) -> Option<Vec<u8>> {
        let class = size_class_for(size);
        let mut storage = self.cache.get_mut(&class)?.pop()?;
        self.cache_bytes = self.cache_bytes.saturating_sub(storage.capacity());
        storage.clear();
        storage.resize(size, 0);
        Some(storage)
    }

    fn cache_storage(&mut self, storage: Vec<u8>) {
        if self.shut_down || storage.capacity() == 0 {
            return;
        }
        let class = size_class_for(storage.capacity());
        let bucket = self.cache.entry(class).or_default();
        if bucket.len() < MAX_CACHED_PER_CLASS {
            self.cache_bytes += storage.capacity();
            bucket.push(storage);
        }
    }

    fn reclaim(&mut self) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        self.entries.retain(|_, entry| {
            if entry.handle.is_live() {
                return true;
            }
            report.stale_entries += 1;
            report.stale_bytes += entry.size;
            false
        });
        self.used -= report.stale_bytes;
        report.cache_bytes = self.cache_bytes;
        self.cache.clear();
        self.cache_bytes = 0;
        report
    }
}

pub(crate) struct ManagerInner {
    budget: MemoryBudget,
    ledger: Mutex<Ledger>,
    stats: Mutex<AllocationStats>,
    pub(crate) monitor: Mutex<Option<MonitorHandle>>,
}

impl ReleaseTracker for ManagerInner {
    fn on_release(&self, id: BufferId, storage: Vec<u8>) {
        let mut ledger = self.ledger.lock();
        // Missing after shutdown or a reclamation pass; nothing to undo then.
        if let Some(entry) = ledger.entries.remove(&id) {
            ledger.used -= entry.size;
            ledger.cache_storage(storage);
            drop(ledger);
            self.stats.lock().record_release();
            tracing::trace!(component = "memory-manager", %id, tag = %entry.tag, "buffer released");
        }
    }
}

/// Bytes held against the ceiling for working memory that is not a
/// [`PixelBuffer`]. Released when dropped.
#[must_use = "the bytes are released as soon as the reservation is dropped"]
pub struct Reservation {
    id: u64,
    size: u64,
    manager: Option<Arc<ManagerInner>>,
}

impl Reservation {
    pub fn size_bytes(&self) -> u64 {
        self.size
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(inner) = self.manager.take() else {
            return;
        };
        let mut ledger = inner.ledger.lock();
        // Gone after shutdown; `used` was already zeroed then.
        if let Some(reserved) = ledger.reservations.remove(&self.id) {
            ledger.used -= reserved.size;
            ledger.reserved -= reserved.size;
            drop(ledger);
            tracing::trace!(
                component = "memory-manager",
                tag = %reserved.tag,
                size = reserved.size,
                "reservation released"
            );
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

/// Admission control for [`PixelBuffer`] allocation.
///
/// Cloning a `MemoryManager` yields another handle to the same ledger.
///
/// # Example
/// ```
/// use memory_manager::{MemoryBudget, MemoryManager};
/// use pixel_buffer::PixelFormat;
///
/// let manager = MemoryManager::new(MemoryBudget::from_mb(1));
/// let buf = manager.allocate(100, 100, PixelFormat::Gray8, "scratch").unwrap();
/// assert_eq!(manager.used_bytes(), 10_000);
///
/// manager.release(buf).unwrap();
/// assert_eq!(manager.used_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl MemoryManager {
    pub fn new(budget: MemoryBudget) -> Self {
        tracing::debug!(component = "memory-manager", %budget, "memory manager created");
        Self {
            inner: Arc::new(ManagerInner {
                budget,
                ledger: Mutex::new(Ledger::default()),
                stats: Mutex::new(AllocationStats::default()),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Allocates a zero-filled `rows × cols` buffer of `format`.
    ///
    /// The byte size is checked against the ceiling before the dimensions
    /// are validated, so an oversized request is always reported as
    /// [`MemoryError::Exhausted`] and never changes `used`.
    pub fn allocate(
        &self,
        rows: usize,
        cols: usize,
        format: PixelFormat,
        tag: &str,
    ) -> Result<PixelBuffer, MemoryError> {
        let requested = rows as u64 * cols as u64 * format.bytes_per_pixel() as u64;

        let mut ledger = self.inner.ledger.lock();
        self.admit(&mut ledger, requested, tag)?;

        validate_dimensions(rows, cols)?;
        let size = requested as usize;
        let cached = ledger.take_cached(size);
        let reused = cached.is_some();
        let storage = cached.unwrap_or_else(|| vec![0u8; size]);

        let tracker: Arc<dyn ReleaseTracker> = self.inner.clone();
        let buffer = PixelBuffer::from_parts(rows, cols, format, storage, tag, Some(tracker))?;

        ledger.used += requested;
        ledger.entries.insert(
            buffer.id(),
            Allocation {
                tag: tag.to_string(),
                size: requested,
                created: Instant::now(),
                handle: buffer.handle(),
            },
        );
        let used_after = ledger.used;
        drop(ledger);

        self.inner
            .stats
            .lock()
            .record_allocation(requested, reused, used_after);
        tracing::trace!(
            component = "memory-manager",
            id = %buffer.id(),
            tag,
            size = requested,
            used = used_after,
            "buffer allocated"
        );
        Ok(buffer)
    }

    /// Holds `bytes` of working memory against the ceiling until the returned
    /// [`Reservation`] is dropped.
    ///
    /// Admission is the same as for [`allocate`](Self::allocate), including
    /// the forced reclamation pass. A zero-byte request always succeeds and
    /// touches nothing.
    pub fn reserve(&self, bytes: u64, tag: &str) -> Result<Reservation, MemoryError> {
        if bytes == 0 {
            return Ok(Reservation {
                id: 0,
                size: 0,
                manager: None,
            });
        }

        let mut ledger = self.inner.ledger.lock();
        self.admit(&mut ledger, bytes, tag)?;
        ledger.next_reservation += 1;
        let id = ledger.next_reservation;
        ledger.reservations.insert(
            id,
            Reserved {
                tag: tag.to_string(),
                size: bytes,
            },
        );
        ledger.used += bytes;
        ledger.reserved += bytes;
        let used_after = ledger.used;
        drop(ledger);

        self.inner.stats.lock().record_reservation(used_after);
        tracing::trace!(
            component = "memory-manager",
            tag,
            size = bytes,
            used = used_after,
            "working memory reserved"
        );
        Ok(Reservation {
            id,
            size: bytes,
            manager: Some(Arc::clone(&self.inner)),
        })
    }

    /// Refuses `requested` unless it fits under the ceiling, forcing one
    /// reclamation pass first.
    fn admit(&self, ledger: &mut Ledger, requested: u64, tag: &str) -> Result<(), MemoryError> {
        if ledger.shut_down {
            return Err(MemoryError::ShutDown);
        }
        let ceiling = self.inner.budget.as_bytes() as u64;
        if ledger.used + requested <= ceiling {
            return Ok(());
        }

        let report = ledger.reclaim();
        self.inner.stats.lock().record_reclaim();
        tracing::debug!(
            component = "memory-manager",
            requested,
            stale_entries = report.stale_entries,
            cache_bytes = report.cache_bytes,
            "forced reclamation before allocation"
        );
        if ledger.used + requested <= ceiling {
            return Ok(());
        }

        let used = ledger.used;
        self.inner.stats.lock().record_exhausted();
        tracing::warn!(
            component = "memory-manager",
            requested,
            used,
            ceiling,
            tag,
            "allocation denied: budget exhausted"
        );
        Err(MemoryError::Exhausted {
            requested,
            used,
            ceiling,
        })
    }

    /// Allocates a tracked deep copy of `src`.
    pub fn clone_buffer(&self, src: &PixelBuffer, tag: &str) -> Result<PixelBuffer, MemoryError> {
        src.validate("clone_buffer")?;
        let copy = self.allocate(src.rows(), src.cols(), src.format(), tag)?;
        src.copy_into(&copy)?;
        Ok(copy)
    }

    /// Releases a buffer issued by this manager: unregisters it, decrements
    /// `used`, and closes it.
    ///
    /// A buffer from elsewhere is still closed, but reported as
    /// [`MemoryError::Untracked`].
    pub fn release(&self, buffer: PixelBuffer) -> Result<(), MemoryError> {
        let id = buffer.id();
        let tracked = self.inner.ledger.lock().entries.contains_key(&id);
        buffer.close();
        if tracked {
            Ok(())
        } else {
            Err(MemoryError::Untracked { id })
        }
    }

    /// Closes the registered buffer with the given id, wherever it is held.
    pub fn release_id(&self, id: BufferId) -> Result<(), MemoryError> {
        let handle = self
            .inner
            .ledger
            .lock()
            .entries
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or(MemoryError::Untracked { id })?;
        handle.close();
        Ok(())
    }

    /// Drops registrations of buffers that no longer exist and empties the
    /// reuse cache.
    pub fn reclaim(&self) -> ReclaimReport {
        let report = self.inner.ledger.lock().reclaim();
        self.inner.stats.lock().record_reclaim();
        report
    }

    /// Bytes held by registered live buffers and outstanding reservations.
    pub fn used_bytes(&self) -> u64 {
        self.inner.ledger.lock().used
    }

    /// The part of [`used_bytes`](Self::used_bytes) held by reservations.
    pub fn reserved_bytes(&self) -> u64 {
        self.inner.ledger.lock().reserved
    }

    /// Bytes that can still be allocated before hitting the ceiling.
    pub fn available_bytes(&self) -> u64 {
        (self.inner.budget.as_bytes() as u64).saturating_sub(self.used_bytes())
    }

    /// Number of registered live buffers.
    pub fn active_count(&self) -> usize {
        self.inner.ledger.lock().entries.len()
    }

    /// Bytes of storage held in the reuse cache.
    pub fn cached_bytes(&self) -> usize {
        self.inner.ledger.lock().cache_bytes
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    pub fn stats(&self) -> AllocationStats {
        self.inner.stats.lock().clone()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.ledger.lock().shut_down
    }

    /// The `n` oldest registered buffers, oldest first.
    pub fn oldest(&self, n: usize) -> Vec<AllocationInfo> {
        let mut all = self.allocations();
        all.sort_by(|a, b| b.age.cmp(&a.age));
        all.truncate(n);
        all
    }

    /// Every registered buffer, in no particular order.
    pub fn allocations(&self) -> Vec<AllocationInfo> {
        let now = Instant::now();
        self.inner
            .ledger
            .lock()
            .entries
            .iter()
            .map(|(id, entry)| AllocationInfo {
                id: *id,
                tag: entry.tag.clone(),
                size_bytes: entry.size,
                age: now.saturating_duration_since(entry.created),
            })
            .collect()
    }

    /// Stops the monitor, force-closes every still-registered buffer, and
    /// zeroes `used`. Later allocations fail with [`MemoryError::ShutDown`].
    ///
    /// Returns the number of buffers that had to be force-closed.
    pub fn shutdown(&self) -> usize {
        if let Some(monitor) = self.inner.monitor.lock().take() {
            monitor.stop();
        }

        let now = Instant::now();
        let leaked: Vec<(BufferId, Allocation)> = {
            let mut ledger = self.inner.ledger.lock();
            if ledger.shut_down {
                return 0;
            }
            ledger.shut_down = true;
            ledger.used = 0;
            ledger.reserved = 0;
            ledger.reservations.clear();
            ledger.cache.clear();
            ledger.cache_bytes = 0;
            ledger.entries.drain().collect()
        };

        // Close outside the lock: each close re-enters `on_release`.
        let mut forced = 0;
        for (id, entry) in &leaked {
            tracing::warn!(
                component = "memory-manager",
                %id,
                tag = %entry.tag,
                size = entry.size,
                age_ms = now.saturating_duration_since(entry.created).as_millis() as u64,
                "force-closing unreleased buffer at shutdown"
            );
            if entry.handle.close() {
                forced += 1;
            }
        }
        self.inner.stats.lock().record_forced_closes(forced);
        tracing::info!(component = "memory-manager", forced, "memory manager shut down");
        forced
    }

    pub(crate) fn record_diagnostics(&self) {
        self.inner.stats.lock().record_diagnostics();
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.inner.ledger.lock();
        f.debug_struct("MemoryManager")
            .field("budget", &self.inner.budget)
            .field("used_bytes", &ledger.used)
            .field("active", &ledger.entries.len())
            .field("reserved_bytes", &ledger.reserved)
            .finish()
    }
}

/// Smallest power of two that is at least `size` and [`MIN_SIZE_CLASS`].
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}
