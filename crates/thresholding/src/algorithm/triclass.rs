// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Iterative tri-class thresholding.
//!
//! Each iteration estimates one threshold over the current region's
//! non-zero pixels and splits the region three ways: foreground above an
//! upper band, background below a lower band, and a to-be-determined (TBD)
//! class in between. Foreground accumulates into the result; the TBD pixels,
//! re-read from the grayscale image, become the next region.
//!
//! The loop stops on the first of:
//!
//! - the region has no non-zero pixels ([`StopReason::EmptyRegion`]),
//! - the last [`ConvergenceHistory::WINDOW`] threshold deltas are all
//!   within `convergence_precision` ([`StopReason::Converged`]),
//! - the TBD fraction of the whole image drops below
//!   `minimum_tbd_fraction` ([`StopReason::TbdBelowMinimum`]),
//! - `max_iterations` is reached ([`StopReason::MaxIterations`]).

use super::{grayscale, intensity_range, Scratch, ThresholdOutput, Thresholder};
use crate::error::AtStage;
use crate::histogram::{bin_to_value, Histogram1D};
use crate::params::{DefaultValue, ParamKind, ParamSpec, ValidatedParams};
use crate::{
    AlgorithmError, AlgorithmReport, ParameterSchema, ParameterSet, ProcessingContext, Stage,
    ValidationError,
};
use memory_manager::MemoryManager;
use pixel_buffer::ops::{self, Kernel, NlMeansParams, StructuringElement};
use pixel_buffer::PixelBuffer;
use std::fmt;
use std::time::Instant;

const OP: &str = "triclass";

/// Radius of the box-mean pass in [`TriclassParams::preprocessing`].
const PREPROCESS_RADIUS: usize = 8;
/// Width of the frame `preserve_borders` protects: the radius of the
/// largest cleanup kernel.
const BORDER_WIDTH: usize = 2;
/// Threshold reported for a region with no usable histogram.
const EMPTY_THRESHOLD: f64 = 127.5;

pub static TRICLASS_SCHEMA: ParameterSchema = ParameterSchema {
    algorithm: "Iterative Triclass",
    specs: &[
        ParamSpec {
            name: "initial_threshold_method",
            kind: ParamKind::Choice(&["otsu", "mean", "median"]),
            default: DefaultValue::Str("otsu"),
            description: "Per-iteration threshold estimator",
        },
        ParamSpec {
            name: "histogram_bins",
            kind: ParamKind::Int {
                min: 16,
                max: 256,
                odd: false,
                zero_means_auto: true,
            },
            default: DefaultValue::Int(0),
            description: "Histogram bins per iteration",
        },
        ParamSpec {
            name: "convergence_precision",
            kind: ParamKind::Float { min: 0.1, max: 10.0 },
            default: DefaultValue::Float(1.0),
            description: "Largest threshold change counted as converged",
        },
        ParamSpec {
            name: "max_iterations",
            kind: ParamKind::Int {
                min: 5,
                max: 15,
                odd: false,
                zero_means_auto: false,
            },
            default: DefaultValue::Int(10),
            description: "Iteration limit",
        },
        ParamSpec {
            name: "minimum_tbd_fraction",
            kind: ParamKind::Float {
                min: 0.001,
                max: 0.2,
            },
            default: DefaultValue::Float(0.01),
            description: "Stop once the TBD class covers less of the image",
        },
        ParamSpec {
            name: "class_separation",
            kind: ParamKind::Float { min: 0.1, max: 0.8 },
            default: DefaultValue::Float(0.5),
            description: "Relative half-width of the TBD band",
        },
        ParamSpec {
            name: "preprocessing",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Box-mean smoothing then non-local-means denoise",
        },
        ParamSpec {
            name: "result_cleanup",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(true),
            description: "Open, close, then median-filter the result",
        },
        ParamSpec {
            name: "preserve_borders",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Keep the outer frame out of cleanup",
        },
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialThresholdMethod {
    Otsu,
    Mean,
    Median,
}

impl InitialThresholdMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otsu => "otsu",
            Self::Mean => "mean",
            Self::Median => "median",
        }
    }

    fn from_validated(name: &str) -> Self {
        match name {
            "mean" => Self::Mean,
            "median" => Self::Median,
            _ => Self::Otsu,
        }
    }

    /// Threshold position in bin coordinates.
    fn estimate(&self, hist: &Histogram1D) -> Option<f64> {
        match self {
            Self::Otsu => hist.otsu_bin(),
            Self::Mean => hist.mean_bin(),
            Self::Median => hist.median_bin(),
        }
    }
}

/// Typed, validated tri-class settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TriclassParams {
    pub initial_threshold_method: InitialThresholdMethod,
    /// `0` selects the bin count per iteration from the region.
    pub histogram_bins: usize,
    pub convergence_precision: f64,
    pub max_iterations: usize,
    pub minimum_tbd_fraction: f64,
    pub class_separation: f64,
    pub preprocessing: bool,
    pub result_cleanup: bool,
    pub preserve_borders: bool,
}

impl Default for TriclassParams {
    fn default() -> Self {
        Self {
            initial_threshold_method: InitialThresholdMethod::Otsu,
            histogram_bins: 0,
            convergence_precision: 1.0,
            max_iterations: 10,
            minimum_tbd_fraction: 0.01,
            class_separation: 0.5,
            preprocessing: false,
            result_cleanup: true,
            preserve_borders: false,
        }
    }
}

impl TriclassParams {
    pub fn from_set(params: &ParameterSet) -> Result<Self, ValidationError> {
        TRICLASS_SCHEMA
            .validate(params)
            .map(|v| Self::from_validated(&v))
    }

    fn from_validated(v: &ValidatedParams) -> Self {
        Self {
            initial_threshold_method: InitialThresholdMethod::from_validated(
                v.str("initial_threshold_method"),
            ),
            histogram_bins: v.int("histogram_bins") as usize,
            convergence_precision: v.float("convergence_precision"),
            max_iterations: v.int("max_iterations") as usize,
            minimum_tbd_fraction: v.float("minimum_tbd_fraction"),
            class_separation: v.float("class_separation"),
            preprocessing: v.bool("preprocessing"),
            result_cleanup: v.bool("result_cleanup"),
            preserve_borders: v.bool("preserve_borders"),
        }
    }
}

// ── Loop state ───────────────────────────────────────────────────

/// Absolute threshold changes, one per iteration.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ConvergenceHistory {
    deltas: Vec<f64>,
}

impl ConvergenceHistory {
    /// Number of trailing deltas that must all be within precision.
    pub const WINDOW: usize = 3;

    pub fn push(&mut self, delta: f64) {
        self.deltas.push(delta);
    }

    pub fn deltas(&self) -> &[f64] {
        &self.deltas
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// True once at least `WINDOW` deltas exist and the last `WINDOW` are
    /// all `<= precision`.
    pub fn is_converged(&self, precision: f64) -> bool {
        self.deltas.len() >= Self::WINDOW
            && self.deltas[self.deltas.len() - Self::WINDOW..]
                .iter()
                .all(|&d| d <= precision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StopReason {
    EmptyRegion,
    Converged,
    TbdBelowMinimum,
    MaxIterations,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmptyRegion => "empty-region",
            Self::Converged => "converged",
            Self::TbdBelowMinimum => "tbd-below-minimum",
            Self::MaxIterations => "max-iterations",
        })
    }
}

/// One completed segmentation pass.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IterationRecord {
    pub index: usize,
    pub threshold: f64,
    pub bins: usize,
    pub foreground: usize,
    pub background: usize,
    pub tbd: usize,
    pub tbd_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TriclassReport {
    /// Threshold estimated by every iteration, on the 0..=255 scale.
    pub thresholds: Vec<f64>,
    pub history: ConvergenceHistory,
    /// Iterations that went on to segment their region.
    pub records: Vec<IterationRecord>,
    pub stop_reason: StopReason,
    pub foreground_pixels: usize,
}

impl TriclassReport {
    /// Iterations that estimated a threshold.
    pub fn iterations(&self) -> usize {
        self.thresholds.len()
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Bin count from the region's non-zero pixels.
///
/// Base 64, 32 for a narrow range (< 30), 128 for a wide one (> 150);
/// halved (minimum 16) when the region covers under a quarter of the image.
pub fn region_bins(region: &[u8], total_pixels: usize) -> usize {
    let nonzero = region.iter().filter(|&&v| v > 0);
    let count = nonzero.clone().count();
    if count == 0 {
        return 64;
    }
    let (lo, hi) = intensity_range(nonzero);
    let mut bins = match hi - lo {
        r if r < 30 => 32,
        r if r > 150 => 128,
        _ => 64,
    };
    if count < total_pixels / 4 {
        bins = (bins / 2).max(16);
    }
    bins
}

/// Threshold on the 0..=255 scale for the region's non-zero pixels.
pub fn estimate_threshold(region: &[u8], method: InitialThresholdMethod, bins: usize) -> f64 {
    let hist = Histogram1D::from_nonzero(region, bins);
    let max_bin = (hist.bins() - 1) as f64;
    match method.estimate(&hist) {
        Some(pos) => bin_to_value(pos.clamp(0.0, max_bin), hist.bins()),
        None => EMPTY_THRESHOLD,
    }
}

/// Lower and upper band limits around `threshold`.
///
/// The band is wider for dark thresholds and narrower for bright ones.
pub fn band(threshold: f64, separation: f64) -> (f64, f64) {
    let scale = if threshold < 50.0 {
        1.5
    } else if threshold > 200.0 {
        0.8
    } else {
        1.0
    };
    let gap = separation * scale;
    (threshold * (1.0 - gap), threshold * (1.0 + gap))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Foreground,
    Background,
    Tbd,
}

fn classify(value: u8, lo: f64, hi: f64) -> Option<Class> {
    if value == 0 {
        return None;
    }
    let v = value as f64;
    Some(if v > hi {
        Class::Foreground
    } else if v < lo {
        Class::Background
    } else {
        Class::Tbd
    })
}

/// Writes a 0/255 mask of `class` over `region` into `mask`; returns its count.
fn write_mask(
    region: &PixelBuffer,
    mask: &PixelBuffer,
    class: Class,
    lo: f64,
    hi: f64,
) -> Result<usize, AlgorithmError> {
    region
        .transform_into(mask, OP, |r, m| {
            let mut count = 0;
            for (out, &v) in m.iter_mut().zip(r) {
                let hit = classify(v, lo, hi) == Some(class);
                *out = if hit { 255 } else { 0 };
                count += hit as usize;
            }
            count
        })
        .at(Stage::Iteration)
}

/// The IterativeTriclass algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterativeTriclass;

impl Thresholder for IterativeTriclass {
    fn name(&self) -> &'static str {
        TRICLASS_SCHEMA.algorithm
    }

    fn schema(&self) -> &'static ParameterSchema {
        &TRICLASS_SCHEMA
    }

    fn process(
        &self,
        input: &PixelBuffer,
        params: &ParameterSet,
        ctx: &ProcessingContext,
        memory: &MemoryManager,
    ) -> Result<ThresholdOutput, AlgorithmError> {
        let p = TriclassParams::from_set(params)?;
        ctx.checkpoint(Stage::Validate)?;
        input.validate(OP).at(Stage::Validate)?;

        let started = Instant::now();
        let scratch = Scratch::new(memory, input, OP);
        let total = scratch.num_pixels();
        let gray = grayscale(input, &scratch, ctx)?;

        let denoised = if p.preprocessing {
            Some(preprocess(&gray, &scratch, ctx)?)
        } else {
            None
        };
        let working = denoised.as_ref().unwrap_or(&gray);

        let result = scratch.gray(Stage::Iteration, "result")?;
        let mut region = memory
            .clone_buffer(working, "triclass.region")
            .at(Stage::Iteration)?;
        drop(denoised);

        let mut thresholds = Vec::new();
        let mut history = ConvergenceHistory::default();
        let mut records = Vec::new();
        let mut stop_reason = StopReason::MaxIterations;
        let mut previous = -1.0;

        for index in 0..p.max_iterations {
            ctx.checkpoint(Stage::Iteration)?;

            let (nonzero, bins, threshold) = region
                .with_data(OP, |r| {
                    let nonzero = r.iter().filter(|&&v| v > 0).count();
                    let bins = match p.histogram_bins {
                        0 => region_bins(r, total),
                        n => n,
                    };
                    let threshold = if nonzero > 0 {
                        estimate_threshold(r, p.initial_threshold_method, bins)
                    } else {
                        EMPTY_THRESHOLD
                    };
                    (nonzero, bins, threshold)
                })
                .at(Stage::Iteration)?;
            if nonzero == 0 {
                stop_reason = StopReason::EmptyRegion;
                break;
            }

            thresholds.push(threshold);
            history.push((threshold - previous).abs());
            previous = threshold;
            if history.is_converged(p.convergence_precision) {
                stop_reason = StopReason::Converged;
                break;
            }

            let (lo, hi) = band(threshold, p.class_separation);
            let foreground = scratch.gray(Stage::Iteration, "foreground")?;
            let background = scratch.gray(Stage::Iteration, "background")?;
            let tbd = scratch.gray(Stage::Iteration, "tbd")?;
            let fg_count = write_mask(&region, &foreground, Class::Foreground, lo, hi)?;
            let bg_count = write_mask(&region, &background, Class::Background, lo, hi)?;
            let tbd_count = write_mask(&region, &tbd, Class::Tbd, lo, hi)?;

            foreground
                .transform_into(&result, OP, |f, out| {
                    for (o, &v) in out.iter_mut().zip(f) {
                        *o |= v;
                    }
                })
                .at(Stage::Iteration)?;

            let tbd_fraction = tbd_count as f64 / total as f64;
            tracing::debug!(
                component = "triclass",
                iteration = index,
                threshold,
                bins,
                foreground = fg_count,
                background = bg_count,
                tbd = tbd_count,
                tbd_fraction,
                "iteration complete"
            );
            records.push(IterationRecord {
                index,
                threshold,
                bins,
                foreground: fg_count,
                background: bg_count,
                tbd: tbd_count,
                tbd_fraction,
            });

            if tbd_fraction < p.minimum_tbd_fraction {
                stop_reason = StopReason::TbdBelowMinimum;
                break;
            }

            let next = scratch.gray(Stage::Iteration, "region")?;
            tbd.with_data(OP, |t| {
                gray.transform_into(&next, OP, |g, n| {
                    for ((out, &src), &mark) in n.iter_mut().zip(g).zip(t) {
                        *out = if mark == 255 { src } else { 0 };
                    }
                })
            })
            .and_then(|inner| inner)
            .at(Stage::Iteration)?;
            region = next;
        }
        drop(region);
        drop(gray);

        let output = if p.result_cleanup {
            ctx.checkpoint(Stage::Cleanup)?;
            cleanup(&result, &scratch, p.preserve_borders)?
        } else {
            result
        };
        let foreground_pixels = output
            .with_data(OP, |d| d.iter().filter(|&&v| v == 255).count())
            .at(Stage::Cleanup)?;

        tracing::info!(
            component = "triclass",
            rows = input.rows(),
            cols = input.cols(),
            iterations = thresholds.len(),
            stop = %stop_reason,
            foreground = foreground_pixels,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "binarization complete"
        );

        Ok(ThresholdOutput {
            image: output,
            report: AlgorithmReport::Triclass(TriclassReport {
                thresholds,
                history,
                records,
                stop_reason,
                foreground_pixels,
            }),
        })
    }
}

fn preprocess(
    gray: &PixelBuffer,
    scratch: &Scratch<'_>,
    ctx: &ProcessingContext,
) -> Result<PixelBuffer, AlgorithmError> {
    ctx.checkpoint(Stage::Preprocess)?;
    let smoothed = scratch.gray(Stage::Preprocess, "smoothed")?;
    let table = scratch.working(Stage::Preprocess, Kernel::BoxMean)?;
    ops::box_mean(gray, &smoothed, PREPROCESS_RADIUS).at(Stage::Preprocess)?;
    drop(table);
    let denoised = scratch.gray(Stage::Preprocess, "denoised")?;
    ops::non_local_means(&smoothed, &denoised, NlMeansParams::default()).at(Stage::Preprocess)?;
    Ok(denoised)
}

/// 3×3 open, 5×5 close, 3×3 median. With `preserve_borders` the outer
/// frame keeps its values from `result`.
fn cleanup(
    result: &PixelBuffer,
    scratch: &Scratch<'_>,
    preserve_borders: bool,
) -> Result<PixelBuffer, AlgorithmError> {
    let stage = Stage::Cleanup;
    let opened = scratch.gray(stage, "opened")?;
    let pass = scratch.working(stage, Kernel::Open)?;
    ops::open(result, &opened, &StructuringElement::ellipse(3)).at(stage)?;
    drop(pass);
    let closed = scratch.gray(stage, "closed")?;
    let pass = scratch.working(stage, Kernel::Close)?;
    ops::close(&opened, &closed, &StructuringElement::ellipse(5)).at(stage)?;
    drop(pass);
    drop(opened);
    let smoothed = scratch.gray(stage, "cleaned")?;
    ops::median_blur(&closed, &smoothed, 3).at(stage)?;

    if preserve_borders {
        let (rows, cols) = (result.rows(), result.cols());
        result
            .transform_into(&smoothed, OP, |src, dst| {
                for r in 0..rows {
                    for c in 0..cols {
                        let frame = r < BORDER_WIDTH
                            || c < BORDER_WIDTH
                            || r + BORDER_WIDTH >= rows
                            || c + BORDER_WIDTH >= cols;
                        if frame {
                            dst[r * cols + c] = src[r * cols + c];
                        }
                    }
                }
            })
            .at(stage)?;
    }
    Ok(smoothed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParamValue;
    use memory_manager::MemoryBudget;
    use pixel_buffer::PixelFormat;

    fn manager() -> MemoryManager {
        MemoryManager::new(MemoryBudget::from_mb(64))
    }

    fn gray(rows: usize, cols: usize, f: impl Fn(usize, usize) -> u8) -> PixelBuffer {
        let data = (0..rows * cols).map(|k| f(k / cols, k % cols)).collect();
        PixelBuffer::from_vec(rows, cols, PixelFormat::Gray8, data).unwrap()
    }

    fn run(input: &PixelBuffer, params: &ParameterSet, m: &MemoryManager) -> (Vec<u8>, TriclassReport) {
        let out = IterativeTriclass
            .process(input, params, &ProcessingContext::new(), m)
            .unwrap();
        let pixels = out.image.to_vec().unwrap();
        match out.report {
            AlgorithmReport::Triclass(r) => (pixels, r),
            other => panic!("unexpected report {other:?}"),
        }
    }

    /// The loop stops at the first iteration whose trailing window is
    /// within precision, and no earlier prefix qualified.
    fn assert_halts_exactly(report: &TriclassReport, precision: f64) {
        let deltas = report.history.deltas();
        assert_eq!(deltas.len(), report.thresholds.len());
        for k in ConvergenceHistory::WINDOW..deltas.len() {
            assert!(
                !deltas[k - ConvergenceHistory::WINDOW..k].iter().all(|&d| d <= precision),
                "window ending at {k} had already converged"
            );
        }
        if report.stop_reason == StopReason::Converged {
            let tail = &deltas[deltas.len() - ConvergenceHistory::WINDOW..];
            assert!(tail.iter().all(|&d| d <= precision));
            assert_eq!(report.records.len() + 1, report.thresholds.len());
        }
    }

    #[test]
    fn test_defaults_match_schema() {
        assert_eq!(
            TriclassParams::from_set(&ParameterSet::new()).unwrap(),
            TriclassParams::default()
        );
        let p = TriclassParams::from_set(&ParameterSet::new().with("initial_threshold_method", "Median"))
            .unwrap();
        assert_eq!(p.initial_threshold_method, InitialThresholdMethod::Median);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let cases: [(&str, ParamValue); 6] = [
            ("max_iterations", 4.into()),
            ("max_iterations", 16.into()),
            ("convergence_precision", 0.05.into()),
            ("minimum_tbd_fraction", 0.3.into()),
            ("class_separation", 0.9.into()),
            ("initial_threshold_method", "kmeans".into()),
        ];
        for (name, value) in cases {
            let params = ParameterSet::new().with(name, value);
            assert!(
                TriclassParams::from_set(&params).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_convergence_history() {
        let mut h = ConvergenceHistory::default();
        h.push(0.1);
        h.push(0.1);
        assert!(!h.is_converged(1.0));
        h.push(0.1);
        assert!(h.is_converged(1.0));
        h.push(2.0);
        assert!(!h.is_converged(1.0));
    }

    #[test]
    fn test_band_widths() {
        let (lo, hi) = band(100.0, 0.5);
        assert!((lo - 50.0).abs() < 1e-9 && (hi - 150.0).abs() < 1e-9);
        let (lo, hi) = band(40.0, 0.5);
        assert!((lo - 10.0).abs() < 1e-9 && (hi - 70.0).abs() < 1e-9);
        let (lo, hi) = band(210.0, 0.5);
        assert!((lo - 126.0).abs() < 1e-9 && (hi - 294.0).abs() < 1e-9);
    }

    #[test]
    fn test_region_bins() {
        assert_eq!(region_bins(&[0, 0, 0, 0], 4), 64);
        assert_eq!(region_bins(&[10, 20, 30, 35], 4), 32);
        assert_eq!(region_bins(&[10, 200, 30, 35], 4), 128);
        assert_eq!(region_bins(&[10, 100, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], 12), 32);
    }

    #[test]
    fn test_uniform_region_converges() {
        let m = manager();
        let input = gray(16, 16, |_, _| 100);
        let (pixels, report) = run(&input, &ParameterSet::new(), &m);
        assert_eq!(report.stop_reason, StopReason::Converged);
        assert_eq!(report.iterations(), 4);
        assert_eq!(report.records.len(), 3);
        assert!(report.records.iter().all(|r| r.tbd == 256));
        assert!(pixels.iter().all(|&v| v == 0));
        assert_halts_exactly(&report, 1.0);
    }

    #[test]
    fn test_empty_region_stops_immediately() {
        let m = manager();
        let input = gray(8, 8, |_, _| 0);
        let (pixels, report) = run(&input, &ParameterSet::new(), &m);
        assert_eq!(report.stop_reason, StopReason::EmptyRegion);
        assert_eq!(report.iterations(), 0);
        assert!(pixels.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_two_levels_stop_on_tbd_fraction() {
        let m = manager();
        let input = gray(32, 32, |_, c| if c < 16 { 40 } else { 220 });
        let (pixels, report) = run(&input, &ParameterSet::new(), &m);
        assert_eq!(report.stop_reason, StopReason::TbdBelowMinimum);
        assert_eq!(report.iterations(), 1);
        assert!((report.thresholds[0] - 127.5).abs() < 1.0);
        assert_eq!(report.records[0].foreground, 512);
        assert_eq!(report.records[0].background, 512);
        assert_eq!(pixels[16 * 32 + 2], 0);
        assert_eq!(pixels[16 * 32 + 29], 255);
        assert_eq!(report.foreground_pixels, 512);
        assert_eq!(m.active_count(), 0);
    }

    #[test]
    fn test_threshold_methods_differ() {
        let m = manager();
        let input = gray(32, 32, |_, c| if c < 16 { 40 } else { 220 });
        let mean = ParameterSet::new().with("initial_threshold_method", "mean");
        let (_, report) = run(&input, &mean, &m);
        assert!((report.thresholds[0] - 128.5).abs() < 0.5);

        let median = ParameterSet::new().with("initial_threshold_method", "median");
        let (_, report) = run(&input, &median, &m);
        assert!((report.thresholds[0] - 38.15).abs() < 0.5);
        assert!(report.iterations() > 1);
        assert_halts_exactly(&report, 1.0);
    }

    #[test]
    fn test_gradient_halts_exactly() {
        let m = manager();
        let input = gray(48, 48, |r, c| (20 + (r * 3 + c * 2) % 220) as u8);
        for precision in [0.1, 1.0, 10.0] {
            let params = ParameterSet::new()
                .with("convergence_precision", precision)
                .with("max_iterations", 15)
                .with("minimum_tbd_fraction", 0.001);
            let (pixels, report) = run(&input, &params, &m);
            assert!(report.iterations() <= 15);
            assert!(pixels.iter().all(|&v| v == 0 || v == 255));
            assert_halts_exactly(&report, precision);
        }
        assert_eq!(m.active_count(), 0);
    }

    #[test]
    fn test_preprocessing_and_no_cleanup() {
        let m = manager();
        let input = gray(40, 40, |r, _| if r < 20 { 30 } else { 230 });
        let params = ParameterSet::new()
            .with("preprocessing", true)
            .with("result_cleanup", false);
        let (pixels, report) = run(&input, &params, &m);
        assert!(report.iterations() >= 1);
        assert_eq!(pixels[3 * 40 + 5], 0);
        assert_eq!(pixels[36 * 40 + 5], 255);
    }

    #[test]
    fn test_cleanup_preserves_border_frame() {
        let m = manager();
        let result = gray(16, 16, |r, c| if (r, c) == (0, 0) || (r, c) == (8, 8) { 255 } else { 0 });
        let scratch = Scratch::new(&m, &result, OP);

        let plain = cleanup(&result, &scratch, false).unwrap().to_vec().unwrap();
        assert_eq!(plain[0], 0);
        assert_eq!(plain[8 * 16 + 8], 0);

        let kept = cleanup(&result, &scratch, true).unwrap().to_vec().unwrap();
        assert_eq!(kept[0], 255);
        assert_eq!(kept[8 * 16 + 8], 0);
        assert_eq!(m.active_count(), 0);
    }

    #[test]
    fn test_cancel_mid_loop_leaks_nothing() {
        let m = manager();
        let input = gray(16, 16, |_, _| 100);
        let ctx = ProcessingContext::new();
        let token = ctx.token().clone();
        let seen = std::sync::atomic::AtomicUsize::new(0);
        let ctx = ctx.with_observer(move |stage| {
            if stage == Stage::Iteration && seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1 {
                token.cancel();
            }
        });
        let err = IterativeTriclass
            .process(&input, &ParameterSet::new(), &ctx, &m)
            .unwrap_err();
        assert!(matches!(
            err,
            AlgorithmError::Cancelled {
                stage: Stage::Iteration,
                ..
            }
        ));
        assert_eq!(m.active_count(), 0);
        assert_eq!(m.used_bytes(), 0);
    }
}
