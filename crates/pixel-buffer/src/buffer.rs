// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`PixelBuffer`] type and its release protocol.
//!
//! A buffer owns a row-major `Vec<u8>` behind a read/write lock. Every
//! accessor takes the lock for the duration of the call and checks the
//! validity flag *after* acquiring it, so a concurrent [`close`] can never
//! pull storage out from under a reader.
//!
//! ```text
//!   created (valid = true)
//!       │  close() / drop        ── CAS true → false, exactly once
//!       ▼
//!   closed  (valid = false) ──► ReleaseTracker::on_release(id, storage)
//! ```
//!
//! [`close`]: PixelBuffer::close

use crate::{BufferError, PixelFormat};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Largest allowed extent along either axis.
pub const MAX_DIMENSION: usize = 32768;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer. Clones get a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives the storage of a tracked buffer when it is closed.
///
/// Called at most once per buffer, from whichever thread wins the close.
pub trait ReleaseTracker: Send + Sync {
    fn on_release(&self, id: BufferId, storage: Vec<u8>);
}

/// Checks that `rows` and `cols` are both in `1..=MAX_DIMENSION`.
pub fn validate_dimensions(rows: usize, cols: usize) -> Result<(), BufferError> {
    if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
        return Err(BufferError::InvalidDimensions {
            rows,
            cols,
            max: MAX_DIMENSION,
        });
    }
    Ok(())
}

struct BufferInner {
    id: BufferId,
    rows: usize,
    cols: usize,
    format: PixelFormat,
    tag: String,
    valid: AtomicBool,
    data: RwLock<Vec<u8>>,
    tracker: Option<Arc<dyn ReleaseTracker>>,
}

impl BufferInner {
    fn close(&self) -> bool {
        if self
            .valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let storage = std::mem::take(&mut *self.data.write());
        if let Some(tracker) = &self.tracker {
            tracker.on_release(self.id, storage);
        }
        true
    }

    fn ensure_valid(&self, op: &'static str) -> Result<(), BufferError> {
        if !self.valid.load(Ordering::Acquire) {
            return Err(BufferError::Invalid {
                op,
                id: self.id,
                reason: "buffer is closed",
            });
        }
        Ok(())
    }
}

/// An exclusively-owned 2D array of 8-bit samples with 1, 3, or 4 channels.
///
/// `PixelBuffer` is deliberately not `Clone`: use [`try_clone`] for a deep
/// copy with a new identity. Dropping the buffer closes it.
///
/// # Example
/// ```
/// use pixel_buffer::{PixelBuffer, PixelFormat};
///
/// let buf = PixelBuffer::new(4, 4, PixelFormat::Gray8).unwrap();
/// buf.set(1, 2, 200).unwrap();
/// assert_eq!(buf.get(1, 2).unwrap(), 200);
///
/// assert!(buf.close());
/// assert!(!buf.close()); // idempotent
/// assert!(buf.get(1, 2).is_err());
/// ```
///
/// [`try_clone`]: PixelBuffer::try_clone
pub struct PixelBuffer {
    inner: Arc<BufferInner>,
}

impl PixelBuffer {
    /// Creates an untracked, zero-filled buffer.
    pub fn new(rows: usize, cols: usize, format: PixelFormat) -> Result<Self, BufferError> {
        validate_dimensions(rows, cols)?;
        let data = vec![0u8; rows * cols * format.bytes_per_pixel()];
        Self::from_parts(rows, cols, format, data, String::new(), None)
    }

    /// Creates an untracked buffer over existing row-major samples.
    pub fn from_vec(
        rows: usize,
        cols: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, BufferError> {
        Self::from_parts(rows, cols, format, data, String::new(), None)
    }

    /// Creates a buffer from all of its parts.
    ///
    /// This is the constructor used by allocators that want to be told
    /// when the buffer is closed.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        format: PixelFormat,
        data: Vec<u8>,
        tag: impl Into<String>,
        tracker: Option<Arc<dyn ReleaseTracker>>,
    ) -> Result<Self, BufferError> {
        validate_dimensions(rows, cols)?;
        let expected = rows * cols * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(BufferError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            inner: Arc::new(BufferInner {
                id: BufferId::next(),
                rows,
                cols,
                format,
                tag: tag.into(),
                valid: AtomicBool::new(true),
                data: RwLock::new(data),
                tracker,
            }),
        })
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    pub fn rows(&self) -> usize {
        self.inner.rows
    }

    pub fn cols(&self) -> usize {
        self.inner.cols
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn channels(&self) -> usize {
        self.inner.format.channels()
    }

    /// Accounting tag supplied at creation (may be empty).
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Total number of pixels (`rows × cols`).
    pub fn num_pixels(&self) -> usize {
        self.inner.rows * self.inner.cols
    }

    /// Storage footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.num_pixels() * self.inner.format.bytes_per_pixel()
    }

    /// Returns `true` until the buffer is closed.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Succeeds iff the buffer is open, non-empty, and has positive dimensions.
    pub fn validate(&self, op: &'static str) -> Result<(), BufferError> {
        let data = self.inner.data.read();
        self.inner.ensure_valid(op)?;
        if self.inner.rows == 0 || self.inner.cols == 0 || data.is_empty() {
            return Err(BufferError::Invalid {
                op,
                id: self.inner.id,
                reason: "buffer is empty",
            });
        }
        Ok(())
    }

    /// Reads the first channel of the pixel at `(row, col)`.
    ///
    /// For [`PixelFormat::Gray8`] this is the sample itself.
    pub fn get(&self, row: usize, col: usize) -> Result<u8, BufferError> {
        self.read_sample("get", row, col, 0)
    }

    /// Writes the first channel of the pixel at `(row, col)`.
    pub fn set(&self, row: usize, col: usize, value: u8) -> Result<(), BufferError> {
        self.write_sample("set", row, col, 0, value)
    }

    /// Reads one channel of the pixel at `(row, col)`.
    pub fn get_channel(&self, row: usize, col: usize, channel: usize) -> Result<u8, BufferError> {
        self.read_sample("get_channel", row, col, channel)
    }

    /// Writes one channel of the pixel at `(row, col)`.
    pub fn set_channel(
        &self,
        row: usize,
        col: usize,
        channel: usize,
        value: u8,
    ) -> Result<(), BufferError> {
        self.write_sample("set_channel", row, col, channel, value)
    }

    fn offset(
        &self,
        op: &'static str,
        row: usize,
        col: usize,
        channel: usize,
    ) -> Result<usize, BufferError> {
        if row >= self.inner.rows || col >= self.inner.cols {
            return Err(BufferError::Bounds {
                op,
                row,
                col,
                rows: self.inner.rows,
                cols: self.inner.cols,
            });
        }
        let channels = self.channels();
        if channel >= channels {
            return Err(BufferError::ChannelOutOfRange {
                op,
                channel,
                format: self.inner.format,
            });
        }
        Ok((row * self.inner.cols + col) * channels + channel)
    }

    fn read_sample(
        &self,
        op: &'static str,
        row: usize,
        col: usize,
        channel: usize,
    ) -> Result<u8, BufferError> {
        let idx = self.offset(op, row, col, channel)?;
        let data = self.inner.data.read();
        self.inner.ensure_valid(op)?;
        Ok(data[idx])
    }

    fn write_sample(
        &self,
        op: &'static str,
        row: usize,
        col: usize,
        channel: usize,
        value: u8,
    ) -> Result<(), BufferError> {
        let idx = self.offset(op, row, col, channel)?;
        let mut data = self.inner.data.write();
        self.inner.ensure_valid(op)?;
        data[idx] = value;
        Ok(())
    }

    /// Runs `f` over the raw samples while holding the read lock.
    pub fn with_data<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, BufferError> {
        let data = self.inner.data.read();
        self.inner.ensure_valid(op)?;
        Ok(f(&data))
    }

    /// Runs `f` over the raw samples while holding the write lock.
    pub fn with_data_mut<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, BufferError> {
        let mut data = self.inner.data.write();
        self.inner.ensure_valid(op)?;
        Ok(f(&mut data))
    }

    /// Reads `self` and writes `dst` under both locks.
    ///
    /// Fails with [`BufferError::Aliased`] if `dst` is `self`, and with
    /// [`BufferError::Incompatible`] if the two differ in size.
    pub fn transform_into<R>(
        &self,
        dst: &PixelBuffer,
        op: &'static str,
        f: impl FnOnce(&[u8], &mut [u8]) -> R,
    ) -> Result<R, BufferError> {
        if self.id() == dst.id() {
            return Err(BufferError::Aliased { op, id: self.id() });
        }
        self.ensure_same_size(dst, op)?;
        // Locks are taken in id order so opposite-direction calls cannot deadlock.
        let (src_data, mut dst_data) = if self.id() < dst.id() {
            let src_data = self.inner.data.read();
            (src_data, dst.inner.data.write())
        } else {
            let dst_data = dst.inner.data.write();
            (self.inner.data.read(), dst_data)
        };
        self.inner.ensure_valid(op)?;
        dst.inner.ensure_valid(op)?;
        Ok(f(&src_data, &mut dst_data))
    }

    /// Fails unless `other` has the same rows and cols.
    pub fn ensure_same_size(&self, other: &PixelBuffer, op: &'static str) -> Result<(), BufferError> {
        if self.rows() != other.rows() || self.cols() != other.cols() {
            return Err(BufferError::Incompatible {
                op,
                lhs: self.describe(),
                rhs: other.describe(),
            });
        }
        Ok(())
    }

    /// Fails unless the buffer has the given format.
    pub fn ensure_format(&self, format: PixelFormat, op: &'static str) -> Result<(), BufferError> {
        if self.format() != format {
            return Err(BufferError::Incompatible {
                op,
                lhs: self.describe(),
                rhs: format!("{format} buffer"),
            });
        }
        Ok(())
    }

    /// Copies the samples out into a fresh `Vec`.
    pub fn to_vec(&self) -> Result<Vec<u8>, BufferError> {
        self.with_data("to_vec", |d| d.to_vec())
    }

    /// Deep copy with a new identity. The copy is untracked.
    pub fn try_clone(&self) -> Result<PixelBuffer, BufferError> {
        let data = self.with_data("clone", |d| d.to_vec())?;
        let tag = if self.tag().is_empty() {
            String::new()
        } else {
            format!("{}_clone", self.tag())
        };
        Self::from_parts(self.rows(), self.cols(), self.format(), data, tag, None)
    }

    /// Copies every sample into `dst`, which must match in size and format.
    pub fn copy_into(&self, dst: &PixelBuffer) -> Result<(), BufferError> {
        if self.id() == dst.id() {
            return self.validate("copy_into");
        }
        if self.format() != dst.format() {
            return Err(BufferError::Incompatible {
                op: "copy_into",
                lhs: self.describe(),
                rhs: dst.describe(),
            });
        }
        self.transform_into(dst, "copy_into", |s, d| d.copy_from_slice(s))
    }

    /// Closes the buffer, releasing its storage.
    ///
    /// Returns `true` for the call that performed the close and `false`
    /// for every later call.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    /// Returns a weak handle that can close this buffer without owning it.
    pub fn handle(&self) -> BufferHandle {
        BufferHandle {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} {}x{} {}",
            self.inner.id, self.inner.rows, self.inner.cols, self.inner.format
        )
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("id", &self.inner.id)
            .field("rows", &self.inner.rows)
            .field("cols", &self.inner.cols)
            .field("format", &self.inner.format)
            .field("tag", &self.inner.tag)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Non-owning reference to a buffer, used by allocators to force-close
/// buffers that were never released.
#[derive(Clone)]
pub struct BufferHandle {
    id: BufferId,
    inner: Weak<BufferInner>,
}

impl BufferHandle {
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns `true` while the buffer exists and has not been closed.
    pub fn is_live(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.valid.load(Ordering::Acquire))
    }

    /// Closes the buffer if it still exists. Same semantics as
    /// [`PixelBuffer::close`].
    pub fn close(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.close(),
            None => false,
        }
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTracker {
        releases: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl ReleaseTracker for CountingTracker {
        fn on_release(&self, _id: BufferId, storage: Vec<u8>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.bytes.fetch_add(storage.len(), Ordering::SeqCst);
        }
    }

    fn tracked(rows: usize, cols: usize, tracker: &Arc<CountingTracker>) -> PixelBuffer {
        let t: Arc<dyn ReleaseTracker> = tracker.clone();
        PixelBuffer::from_parts(
            rows,
            cols,
            PixelFormat::Gray8,
            vec![0; rows * cols],
            "test",
            Some(t),
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_validation() {
        assert!(PixelBuffer::new(0, 5, PixelFormat::Gray8).is_err());
        assert!(PixelBuffer::new(5, 0, PixelFormat::Gray8).is_err());
        assert!(PixelBuffer::new(MAX_DIMENSION + 1, 1, PixelFormat::Gray8).is_err());
        assert!(validate_dimensions(MAX_DIMENSION, 1).is_ok());
    }

    #[test]
    fn test_from_vec_size_mismatch() {
        let err = PixelBuffer::from_vec(2, 2, PixelFormat::Rgb8, vec![0; 4]).unwrap_err();
        assert_eq!(
            err,
            BufferError::DataSizeMismatch {
                expected: 12,
                actual: 4
            }
        );
    }

    #[test]
    fn test_get_set() {
        let buf = PixelBuffer::new(3, 4, PixelFormat::Gray8).unwrap();
        buf.set(2, 3, 77).unwrap();
        assert_eq!(buf.get(2, 3).unwrap(), 77);
        assert_eq!(buf.get(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_bounds_error() {
        let buf = PixelBuffer::new(3, 4, PixelFormat::Gray8).unwrap();
        assert!(matches!(buf.get(3, 0), Err(BufferError::Bounds { row: 3, .. })));
        assert!(matches!(buf.set(0, 4, 1), Err(BufferError::Bounds { col: 4, .. })));
    }

    #[test]
    fn test_channel_access() {
        let buf = PixelBuffer::new(2, 2, PixelFormat::Rgb8).unwrap();
        buf.set_channel(1, 1, 2, 9).unwrap();
        assert_eq!(buf.get_channel(1, 1, 2).unwrap(), 9);
        assert_eq!(buf.with_data("t", |d| d[11]).unwrap(), 9);
        assert!(matches!(
            buf.get_channel(0, 0, 3),
            Err(BufferError::ChannelOutOfRange { channel: 3, .. })
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let tracker = Arc::new(CountingTracker::default());
        let buf = tracked(4, 4, &tracker);
        assert!(buf.close());
        assert!(!buf.close());
        drop(buf);
        assert_eq!(tracker.releases.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.bytes.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_drop_releases_once() {
        let tracker = Arc::new(CountingTracker::default());
        drop(tracked(2, 8, &tracker));
        assert_eq!(tracker.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_access_after_close() {
        let buf = PixelBuffer::new(2, 2, PixelFormat::Gray8).unwrap();
        buf.close();
        assert!(!buf.is_valid());
        assert!(matches!(buf.get(0, 0), Err(BufferError::Invalid { .. })));
        assert!(matches!(buf.validate("op"), Err(BufferError::Invalid { .. })));
        assert!(buf.try_clone().is_err());
    }

    #[test]
    fn test_validate_open_buffer() {
        let buf = PixelBuffer::new(1, 1, PixelFormat::Gray8).unwrap();
        assert!(buf.validate("op").is_ok());
    }

    #[test]
    fn test_clone_is_deep_with_new_id() {
        let buf = PixelBuffer::from_parts(1, 2, PixelFormat::Gray8, vec![1, 2], "src", None).unwrap();
        let copy = buf.try_clone().unwrap();
        assert_ne!(copy.id(), buf.id());
        assert_eq!(copy.tag(), "src_clone");
        copy.set(0, 0, 99).unwrap();
        assert_eq!(buf.get(0, 0).unwrap(), 1);
    }

    #[test]
    fn test_copy_into() {
        let src = PixelBuffer::from_vec(1, 3, PixelFormat::Gray8, vec![4, 5, 6]).unwrap();
        let dst = PixelBuffer::new(1, 3, PixelFormat::Gray8).unwrap();
        src.copy_into(&dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![4, 5, 6]);

        let wrong = PixelBuffer::new(3, 1, PixelFormat::Gray8).unwrap();
        assert!(matches!(
            src.copy_into(&wrong),
            Err(BufferError::Incompatible { .. })
        ));
        // Copying a buffer onto itself is a no-op.
        assert!(src.copy_into(&src).is_ok());
    }

    #[test]
    fn test_transform_into_rejects_alias() {
        let buf = PixelBuffer::new(2, 2, PixelFormat::Gray8).unwrap();
        assert!(matches!(
            buf.transform_into(&buf, "t", |_, _| ()),
            Err(BufferError::Aliased { .. })
        ));
    }

    #[test]
    fn test_opposite_transforms_do_not_deadlock() {
        let a = PixelBuffer::from_vec(64, 64, PixelFormat::Gray8, vec![1; 4096]).unwrap();
        let b = PixelBuffer::from_vec(64, 64, PixelFormat::Gray8, vec![2; 4096]).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2000 {
                    a.transform_into(&b, "a_to_b", |src, dst| dst.copy_from_slice(src))
                        .unwrap();
                }
            });
            s.spawn(|| {
                for _ in 0..2000 {
                    b.transform_into(&a, "b_to_a", |src, dst| dst.copy_from_slice(src))
                        .unwrap();
                }
            });
        });
        assert_eq!(a.to_vec().unwrap(), b.to_vec().unwrap());
    }

    #[test]
    fn test_handle_force_close() {
        let tracker = Arc::new(CountingTracker::default());
        let buf = tracked(2, 2, &tracker);
        let handle = buf.handle();
        assert!(handle.is_live());
        assert!(handle.close());
        assert!(!buf.is_valid());
        assert!(!handle.is_live());
        drop(buf);
        assert_eq!(tracker.releases.load(Ordering::SeqCst), 1);
        assert!(!handle.close());
    }

    #[test]
    fn test_concurrent_readers() {
        let buf = PixelBuffer::from_vec(16, 16, PixelFormat::Gray8, vec![3; 256]).unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let sum: u32 = buf
                        .with_data("sum", |d| d.iter().map(|&v| v as u32).sum())
                        .unwrap();
                    assert_eq!(sum, 768);
                });
            }
        });
    }

    #[test]
    fn test_concurrent_close_single_winner() {
        let tracker = Arc::new(CountingTracker::default());
        let buf = tracked(8, 8, &tracker);
        let winners = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if buf.close() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.releases.load(Ordering::SeqCst), 1);
    }
}
