// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-run processing metrics.
//!
//! [`ProcessingMetrics`] collects stage timings, memory usage, and the
//! foreground share of the output for one `process` call. The PSNR and SSIM
//! fields are size-derived placeholders for display only; they are not
//! computed from pixel data and must not be used as a quality measure. Use
//! [`quality::evaluate`](crate::quality::evaluate) against a ground truth
//! for that.

use std::time::Duration;
use thresholding::{Algorithm, Stage};

/// Rows, columns, and channels of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Dimensions {
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
}

impl Dimensions {
    pub fn of(buffer: &pixel_buffer::PixelBuffer) -> Self {
        Self {
            rows: buffer.rows(),
            cols: buffer.cols(),
            channels: buffer.channels(),
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.rows * self.cols
    }

    fn same_size(&self, other: &Self) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }
}

/// Time spent between one stage checkpoint and the next.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// Aggregate metrics for a processing run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessingMetrics {
    pub algorithm: Algorithm,
    /// Wall-clock time of the whole run, including task hand-off.
    pub total_duration: Duration,
    pub stages: Vec<StageTiming>,
    pub input: Dimensions,
    pub output: Dimensions,
    /// Output pixels equal to 255.
    pub foreground_pixels: usize,
    /// Manager high-water mark at the end of the run.
    pub peak_memory_bytes: u64,
    /// Bytes still registered with the manager at the end of the run.
    pub used_memory_bytes: u64,
    /// Placeholder: `28.5 + w·h / 1e6`, or 0 when sizes differ.
    pub psnr: f64,
    /// Placeholder: `0.85 + channels · 0.05`, or 0 when sizes differ.
    pub ssim: f64,
}

impl ProcessingMetrics {
    pub fn new(algorithm: Algorithm, input: Dimensions) -> Self {
        Self {
            algorithm,
            total_duration: Duration::ZERO,
            stages: Vec::new(),
            input,
            output: input,
            foreground_pixels: 0,
            peak_memory_bytes: 0,
            used_memory_bytes: 0,
            psnr: 0.0,
            ssim: 0.0,
        }
    }

    /// Records the time spent in `stage`.
    pub fn record_stage(&mut self, stage: Stage, elapsed: Duration) {
        self.stages.push(StageTiming { stage, elapsed });
    }

    /// Fills in the output-dependent fields and derives the placeholders.
    pub fn finalise(
        &mut self,
        total: Duration,
        output: Dimensions,
        foreground_pixels: usize,
        peak_memory_bytes: u64,
        used_memory_bytes: u64,
    ) {
        self.total_duration = total;
        self.output = output;
        self.foreground_pixels = foreground_pixels;
        self.peak_memory_bytes = peak_memory_bytes;
        self.used_memory_bytes = used_memory_bytes;
        self.psnr = placeholder_psnr(&self.input, &output);
        self.ssim = placeholder_ssim(&self.input, &output);
    }

    /// Share of output pixels classified as foreground, in `[0.0, 1.0]`.
    pub fn foreground_ratio(&self) -> f64 {
        let n = self.output.num_pixels();
        if n == 0 {
            return 0.0;
        }
        self.foreground_pixels as f64 / n as f64
    }

    /// Total time of all recorded stages.
    pub fn stage_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.elapsed).sum()
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_memory_bytes as f64 / (1024.0 * 1024.0);
        format!(
            "{}: {:.2}ms total, {} stages, {}x{} -> {}x{}, \
             {:.1}% foreground, peak {:.2} MB, PSNR {:.2} (placeholder), SSIM {:.2} (placeholder)",
            self.algorithm,
            self.total_duration.as_secs_f64() * 1000.0,
            self.stages.len(),
            self.input.cols,
            self.input.rows,
            self.output.cols,
            self.output.rows,
            self.foreground_ratio() * 100.0,
            peak_mb,
            self.psnr,
            self.ssim,
        )
    }
}

fn placeholder_psnr(input: &Dimensions, output: &Dimensions) -> f64 {
    if !input.same_size(output) {
        return 0.0;
    }
    28.5 + input.num_pixels() as f64 / 1_000_000.0
}

fn placeholder_ssim(input: &Dimensions, output: &Dimensions) -> f64 {
    if !input.same_size(output) {
        return 0.0;
    }
    0.85 + input.channels as f64 * 0.05
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(rows: usize, cols: usize, channels: usize) -> Dimensions {
        Dimensions {
            rows,
            cols,
            channels,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let m = ProcessingMetrics::new(Algorithm::Otsu2D, dims(0, 0, 1));
        assert_eq!(m.foreground_ratio(), 0.0);
        assert_eq!(m.stage_duration(), Duration::ZERO);
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = ProcessingMetrics::new(Algorithm::IterativeTriclass, dims(1000, 2000, 3));
        m.record_stage(Stage::Grayscale, Duration::from_millis(4));
        m.record_stage(Stage::Iteration, Duration::from_millis(6));
        m.finalise(Duration::from_millis(12), dims(1000, 2000, 1), 500_000, 4096, 0);

        assert_eq!(m.stage_duration(), Duration::from_millis(10));
        assert!((m.foreground_ratio() - 0.25).abs() < 1e-12);
        assert!((m.psnr - 30.5).abs() < 1e-12);
        assert!((m.ssim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_placeholders_zero_on_size_mismatch() {
        let mut m = ProcessingMetrics::new(Algorithm::Otsu2D, dims(10, 10, 1));
        m.finalise(Duration::ZERO, dims(10, 11, 1), 0, 0, 0);
        assert_eq!(m.psnr, 0.0);
        assert_eq!(m.ssim, 0.0);
    }

    #[test]
    fn test_serializes_for_reports() {
        let mut m = ProcessingMetrics::new(Algorithm::IterativeTriclass, dims(4, 4, 1));
        m.record_stage(Stage::BuildHistogram, Duration::from_millis(2));
        m.finalise(Duration::from_millis(2), dims(4, 4, 1), 8, 64, 16);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["algorithm"], "Iterative Triclass");
        assert_eq!(json["output"]["rows"], 4);
        assert_eq!(json["foreground_pixels"], 8);
        assert_eq!(json["stages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_summary_format() {
        let mut m = ProcessingMetrics::new(Algorithm::Otsu2D, dims(20, 40, 1));
        m.record_stage(Stage::Classify, Duration::from_millis(1));
        m.finalise(Duration::from_millis(3), dims(20, 40, 1), 400, 1024 * 1024, 0);
        let s = m.summary();
        assert!(s.starts_with("2D Otsu:"));
        assert!(s.contains("1 stages"));
        assert!(s.contains("40x20"));
        assert!(s.contains("50.0% foreground"));
        assert!(s.contains("peak 1.00 MB"));
    }
}
