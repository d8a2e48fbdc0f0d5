// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Periodic diagnostics for the memory manager.
//!
//! A single tokio task wakes every [`MonitorConfig::interval`] and:
//!
//! - logs allocation/release counts and the active-buffer count,
//! - reports the oldest live buffers once the active count passes
//!   [`MonitorConfig::stale_threshold`],
//! - forces a reclamation pass once `used` passes
//!   [`MonitorConfig::reclaim_ratio`] of the ceiling.
//!
//! The task holds only a weak reference to the manager and checks its stop
//! signal on every tick.

use crate::manager::ManagerInner;
use crate::{AllocationInfo, MemoryError, MemoryManager, ReclaimReport};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Settings for the diagnostic monitor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between diagnostic passes.
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
    /// Active-buffer count above which the oldest buffers are reported.
    pub stale_threshold: usize,
    /// How many of the oldest buffers to report.
    pub stale_report_count: usize,
    /// Fraction of the ceiling above which reclamation is forced.
    pub reclaim_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_threshold: 50,
            stale_report_count: 5,
            reclaim_ratio: 0.8,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(serde::de::Error::custom("interval must be a positive number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Result of one diagnostic pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiagnosticsReport {
    pub active: usize,
    pub used_bytes: u64,
    pub ceiling_bytes: u64,
    /// Oldest live buffers, reported only above the stale threshold.
    pub long_lived: Vec<AllocationInfo>,
    /// Set when usage crossed the reclaim ratio.
    pub reclaimed: Option<ReclaimReport>,
}

pub(crate) struct MonitorHandle {
    stop: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop.send(true);
    }
}

impl MemoryManager {
    /// Spawns the diagnostic task on the current tokio runtime.
    ///
    /// Replaces any monitor already running. Stopped by
    /// [`stop_monitor`](Self::stop_monitor) or [`shutdown`](Self::shutdown).
    pub fn start_monitor(&self, config: MonitorConfig) -> Result<(), MemoryError> {
        if config.interval.is_zero() {
            return Err(MemoryError::Monitor("interval must be non-zero".into()));
        }
        if self.is_shut_down() {
            return Err(MemoryError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MemoryError::Monitor(e.to_string()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.inner);
        tracing::debug!(
            component = "memory-manager",
            interval_ms = config.interval.as_millis() as u64,
            "starting memory monitor"
        );
        let task = runtime.spawn(run_monitor(weak, config, stop_rx));

        let previous = self.inner.monitor.lock().replace(MonitorHandle {
            stop: stop_tx,
            _task: task,
        });
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    /// Signals the diagnostic task to exit. Returns `false` if none was running.
    pub fn stop_monitor(&self) -> bool {
        match self.inner.monitor.lock().take() {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Runs one diagnostic pass immediately.
    pub fn run_diagnostics(&self, config: &MonitorConfig) -> DiagnosticsReport {
        self.record_diagnostics();
        let stats = self.stats();
        let active = self.active_count();
        let used_bytes = self.used_bytes();
        let ceiling_bytes = self.budget().as_bytes() as u64;

        tracing::debug!(
            component = "memory-manager",
            allocations = stats.allocations,
            releases = stats.releases,
            active,
            used_bytes,
            ceiling_bytes,
            "memory stats"
        );

        let mut long_lived = Vec::new();
        if active > config.stale_threshold {
            long_lived = self.oldest(config.stale_report_count);
            for info in &long_lived {
                tracing::warn!(
                    component = "memory-manager",
                    id = %info.id,
                    tag = %info.tag,
                    size = info.size_bytes,
                    age_secs = info.age.as_secs_f64(),
                    "long-lived buffer detected"
                );
            }
        }

        let mut reclaimed = None;
        if used_bytes as f64 > config.reclaim_ratio * ceiling_bytes as f64 {
            let report = self.reclaim();
            tracing::info!(
                component = "memory-manager",
                used_bytes,
                stale_entries = report.stale_entries,
                cache_bytes = report.cache_bytes,
                "high memory usage, forced reclamation"
            );
            reclaimed = Some(report);
        }

        DiagnosticsReport {
            active,
            used_bytes,
            ceiling_bytes,
            long_lived,
            reclaimed,
        }
    }
}

async fn run_monitor(
    manager: Weak<ManagerInner>,
    config: MonitorConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    // The first tick completes immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
        if *stop.borrow() {
            break;
        }
        let Some(inner) = manager.upgrade() else {
            break;
        };
        MemoryManager::from_inner(inner).run_diagnostics(&config);
    }
    tracing::debug!(component = "memory-manager", "memory monitor stopped");
}
