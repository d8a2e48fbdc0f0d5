// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cumulative allocation counters, reported by the diagnostic monitor.

/// Cumulative statistics about the manager's lifetime.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct AllocationStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Allocations whose storage came from the reuse cache.
    pub reused: u64,
    /// Working-memory reservations granted.
    pub reservations: u64,
    /// Allocations and reservations denied by the ceiling.
    pub exhausted: u64,
    /// Buffers closed while tracked (explicit release or drop).
    pub releases: u64,
    /// Buffers force-closed at shutdown.
    pub forced_closes: u64,
    /// Reclamation passes, whether forced by an allocation or the monitor.
    pub reclaim_passes: u64,
    /// Diagnostic monitor ticks.
    pub diagnostic_runs: u64,
    /// High-water mark of live bytes.
    pub peak_used_bytes: u64,
    /// Bytes ever handed out.
    pub cumulative_bytes: u64,
}

impl AllocationStats {
    /// Fraction of allocations served from the reuse cache, in `[0.0, 1.0]`.
    pub fn reuse_ratio(&self) -> f64 {
        if self.allocations == 0 {
            return 0.0;
        }
        self.reused as f64 / self.allocations as f64
    }

    pub(crate) fn record_allocation(&mut self, size: u64, reused: bool, used_after: u64) {
        self.allocations += 1;
        self.cumulative_bytes += size;
        if reused {
            self.reused += 1;
        }
        self.peak_used_bytes = self.peak_used_bytes.max(used_after);
    }

    pub(crate) fn record_reservation(&mut self, used_after: u64) {
        self.reservations += 1;
        self.peak_used_bytes = self.peak_used_bytes.max(used_after);
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub(crate) fn record_exhausted(&mut self) {
        self.exhausted += 1;
    }

    pub(crate) fn record_reclaim(&mut self) {
        self.reclaim_passes += 1;
    }

    pub(crate) fn record_diagnostics(&mut self) {
        self.diagnostic_runs += 1;
    }

    pub(crate) fn record_forced_closes(&mut self, n: usize) {
        self.forced_closes += n as u64;
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Buffers: {} allocated ({:.0}% reused), {} released, {} exhausted, \
             {} force-closed, {} reclaim passes, peak {:.2} MB",
            self.allocations,
            self.reuse_ratio() * 100.0,
            self.releases,
            self.exhausted,
            self.forced_closes,
            self.reclaim_passes,
            self.peak_used_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = AllocationStats::default();
        assert_eq!(s.allocations, 0);
        assert_eq!(s.reuse_ratio(), 0.0);
    }

    #[test]
    fn test_peak_never_decreases() {
        let mut s = AllocationStats::default();
        s.record_allocation(100, false, 100);
        s.record_allocation(50, true, 150);
        s.record_release();
        s.record_allocation(10, false, 60);
        assert_eq!(s.peak_used_bytes, 150);
        assert_eq!(s.cumulative_bytes, 160);
        assert!((s.reuse_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_allocation(1024 * 1024, false, 1024 * 1024);
        s.record_exhausted();
        let text = s.summary();
        assert!(text.contains("1 allocated"));
        assert!(text.contains("1 exhausted"));
        assert!(text.contains("peak 1.00 MB"));
    }
}
