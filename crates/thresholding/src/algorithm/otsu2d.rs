// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Two-dimensional Otsu thresholding.
//!
//! Each pixel contributes the pair (intensity, local-window mean). The
//! threshold pair maximising between-class variance over that joint
//! histogram separates foreground from background; a pixel is foreground
//! only when both of its coordinates exceed their threshold.

use super::{grayscale, intensity_range, Scratch, ThresholdOutput, Thresholder};
use crate::error::AtStage;
use crate::histogram::{bin_position, bin_to_value, search_thresholds, Histogram2D, ThresholdPair};
use crate::params::{DefaultValue, ParamKind, ParamSpec, ValidatedParams};
use crate::{
    AlgorithmError, AlgorithmReport, ParameterSchema, ParameterSet, ProcessingContext, Stage,
    ValidationError,
};
use memory_manager::MemoryManager;
use pixel_buffer::ops::{self, ClaheParams, Kernel, StructuringElement};
use pixel_buffer::PixelBuffer;
use std::time::Instant;

const OP: &str = "otsu2d";

pub static OTSU2D_SCHEMA: ParameterSchema = ParameterSchema {
    algorithm: "2D Otsu",
    specs: &[
        ParamSpec {
            name: "window_size",
            kind: ParamKind::Int {
                min: 3,
                max: 21,
                odd: true,
                zero_means_auto: false,
            },
            default: DefaultValue::Int(7),
            description: "Side of the neighbourhood-mean window",
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
            description: "Bins per histogram axis",
        },
        ParamSpec {
            name: "smoothing_strength",
            kind: ParamKind::Float { min: 0.0, max: 5.0 },
            default: DefaultValue::Float(1.0),
            description: "Gaussian sigma for preprocessing and histogram smoothing",
        },
        ParamSpec {
            name: "edge_preservation",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Median/Gaussian blend before thresholding",
        },
        ParamSpec {
            name: "noise_robustness",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Morphological open then close on the result",
        },
        ParamSpec {
            name: "gaussian_preprocessing",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(true),
            description: "Gaussian blur before building the histogram",
        },
        ParamSpec {
            name: "use_log_histogram",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Log-scale histogram counts",
        },
        ParamSpec {
            name: "normalize_histogram",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(true),
            description: "Scale the histogram to a distribution",
        },
        ParamSpec {
            name: "apply_contrast_enhancement",
            kind: ParamKind::Bool,
            default: DefaultValue::Bool(false),
            description: "Contrast-limited adaptive equalisation",
        },
    ],
};

/// Typed, validated 2-D Otsu settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Otsu2DParams {
    pub window_size: usize,
    /// `0` selects the bin count from the image.
    pub histogram_bins: usize,
    pub smoothing_strength: f64,
    pub edge_preservation: bool,
    pub noise_robustness: bool,
    pub gaussian_preprocessing: bool,
    pub use_log_histogram: bool,
    pub normalize_histogram: bool,
    pub apply_contrast_enhancement: bool,
}

impl Default for Otsu2DParams {
    fn default() -> Self {
        Self {
            window_size: 7,
            histogram_bins: 0,
            smoothing_strength: 1.0,
            edge_preservation: false,
            noise_robustness: false,
            gaussian_preprocessing: true,
            use_log_histogram: false,
            normalize_histogram: true,
            apply_contrast_enhancement: false,
        }
    }
}

impl Otsu2DParams {
    pub fn from_set(params: &ParameterSet) -> Result<Self, ValidationError> {
        OTSU2D_SCHEMA.validate(params).map(|v| Self::from_validated(&v))
    }

    fn from_validated(v: &ValidatedParams) -> Self {
        Self {
            window_size: v.int("window_size") as usize,
            histogram_bins: v.int("histogram_bins") as usize,
            smoothing_strength: v.float("smoothing_strength"),
            edge_preservation: v.bool("edge_preservation"),
            noise_robustness: v.bool("noise_robustness"),
            gaussian_preprocessing: v.bool("gaussian_preprocessing"),
            use_log_histogram: v.bool("use_log_histogram"),
            normalize_histogram: v.bool("normalize_histogram"),
            apply_contrast_enhancement: v.bool("apply_contrast_enhancement"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Otsu2DReport {
    pub bins: usize,
    /// Thresholds in bin coordinates.
    pub intensity_threshold: f64,
    pub neighborhood_threshold: f64,
    pub variance: f64,
    pub foreground_pixels: usize,
}

impl Otsu2DReport {
    /// Intensity threshold on the 0..=255 scale.
    pub fn intensity_threshold_value(&self) -> f64 {
        bin_to_value(self.intensity_threshold, self.bins)
    }
}

/// Kernel side for a Gaussian of `sigma`: `6σ + 1`, made odd, within 3..=15.
pub fn gaussian_kernel_size(sigma: f64) -> usize {
    let mut k = (6.0 * sigma.max(0.0)) as usize + 1;
    if k % 2 == 0 {
        k += 1;
    }
    k.clamp(3, 15)
}

/// Bin count from the intensity range and image size.
pub fn adaptive_bins(min: u8, max: u8, pixels: usize) -> usize {
    let range = max.saturating_sub(min);
    let mut bins = match range {
        r if r < 50 => 32,
        r if r > 200 => 128,
        _ => 64,
    };
    if pixels > 1_000_000 {
        bins = (bins * 2).min(256);
    } else if pixels < 100_000 {
        bins = (bins / 2).max(16);
    }
    bins
}

/// The 2-D Otsu algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Otsu2D;

impl Thresholder for Otsu2D {
    fn name(&self) -> &'static str {
        OTSU2D_SCHEMA.algorithm
    }

    fn schema(&self) -> &'static ParameterSchema {
        &OTSU2D_SCHEMA
    }

    fn process(
        &self,
        input: &PixelBuffer,
        params: &ParameterSet,
        ctx: &ProcessingContext,
        memory: &MemoryManager,
    ) -> Result<ThresholdOutput, AlgorithmError> {
        let p = Otsu2DParams::from_set(params)?;
        ctx.checkpoint(Stage::Validate)?;
        input.validate(OP).at(Stage::Validate)?;

        let started = Instant::now();
        let scratch = Scratch::new(memory, input, OP);
        let mut gray = grayscale(input, &scratch, ctx)?;

        if p.edge_preservation {
            ctx.checkpoint(Stage::EdgePreservation)?;
            preserve_edges(&gray, &scratch)?;
        }

        if p.gaussian_preprocessing {
            ctx.checkpoint(Stage::GaussianBlur)?;
            let blurred = scratch.gray(Stage::GaussianBlur, "blurred")?;
            let pass = scratch.working(Stage::GaussianBlur, Kernel::GaussianBlur)?;
            let ksize = gaussian_kernel_size(p.smoothing_strength);
            ops::gaussian_blur(&gray, &blurred, ksize, p.smoothing_strength)
                .at(Stage::GaussianBlur)?;
            drop(pass);
            gray = blurred;
        }

        if p.apply_contrast_enhancement {
            ctx.checkpoint(Stage::ContrastEnhancement)?;
            let equalized = scratch.gray(Stage::ContrastEnhancement, "equalized")?;
            ops::equalize_adaptive(&gray, &equalized, ClaheParams::default())
                .at(Stage::ContrastEnhancement)?;
            gray = equalized;
        }

        ctx.checkpoint(Stage::NeighborhoodMean)?;
        let neighborhood = scratch.gray(Stage::NeighborhoodMean, "neighborhood")?;
        let table = scratch.working(Stage::NeighborhoodMean, Kernel::LocalMean)?;
        ops::local_mean(&gray, &neighborhood, p.window_size).at(Stage::NeighborhoodMean)?;
        drop(table);

        ctx.checkpoint(Stage::BuildHistogram)?;
        let bins = match p.histogram_bins {
            0 => {
                let (lo, hi) = gray
                    .with_data(OP, |g| intensity_range(g))
                    .at(Stage::BuildHistogram)?;
                adaptive_bins(lo, hi, scratch.num_pixels())
            }
            n => n,
        };
        let search = scratch.reserve(
            Stage::BuildHistogram,
            Histogram2D::search_footprint_bytes(bins),
            "histogram",
        )?;
        let mut hist = gray
            .with_data(OP, |g| {
                neighborhood.with_data(OP, |n| Histogram2D::build(g, n, bins))
            })
            .and_then(|inner| inner)
            .at(Stage::BuildHistogram)?;
        if p.use_log_histogram {
            hist.apply_log_scale();
        }
        if p.normalize_histogram {
            hist.normalize();
        }
        if p.smoothing_strength > 0.0 {
            hist.smooth(p.smoothing_strength);
        }

        ctx.checkpoint(Stage::ThresholdSearch)?;
        let best = search_thresholds(&hist.moments());
        drop(hist);
        drop(search);
        tracing::debug!(
            component = "otsu2d",
            bins,
            t1 = best.intensity,
            t2 = best.neighborhood,
            variance = best.variance,
            "threshold pair selected"
        );

        ctx.checkpoint(Stage::Classify)?;
        let output = scratch.gray(Stage::Classify, "output")?;
        let mut foreground = neighborhood
            .with_data(OP, |n| {
                gray.transform_into(&output, OP, |g, out| classify(g, n, out, bins, &best))
            })
            .and_then(|inner| inner)
            .at(Stage::Classify)?;
        drop(neighborhood);
        drop(gray);

        let output = if p.noise_robustness {
            ctx.checkpoint(Stage::NoiseReduction)?;
            let element = StructuringElement::ellipse(3);
            let opened = scratch.gray(Stage::NoiseReduction, "opened")?;
            let pass = scratch.working(Stage::NoiseReduction, Kernel::Open)?;
            ops::open(&output, &opened, &element).at(Stage::NoiseReduction)?;
            drop(pass);
            let closed = scratch.gray(Stage::NoiseReduction, "closed")?;
            let pass = scratch.working(Stage::NoiseReduction, Kernel::Close)?;
            ops::close(&opened, &closed, &element).at(Stage::NoiseReduction)?;
            drop(pass);
            foreground = closed
                .with_data(OP, |d| d.iter().filter(|&&v| v == 255).count())
                .at(Stage::NoiseReduction)?;
            closed
        } else {
            output
        };

        tracing::info!(
            component = "otsu2d",
            rows = input.rows(),
            cols = input.cols(),
            foreground,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "binarization complete"
        );

        Ok(ThresholdOutput {
            image: output,
            report: AlgorithmReport::Otsu2D(Otsu2DReport {
                bins,
                intensity_threshold: best.intensity,
                neighborhood_threshold: best.neighborhood,
                variance: best.variance,
                foreground_pixels: foreground,
            }),
        })
    }
}

/// Blends a 5×5 median copy (0.6) with a σ = 1 Gaussian of it (0.4) back
/// into `gray`.
fn preserve_edges(gray: &PixelBuffer, scratch: &Scratch<'_>) -> Result<(), AlgorithmError> {
    let stage = Stage::EdgePreservation;
    let median = scratch.gray(stage, "median")?;
    ops::median_blur(gray, &median, 5).at(stage)?;
    let smooth = scratch.gray(stage, "smooth")?;
    let pass = scratch.working(stage, Kernel::GaussianBlur)?;
    ops::gaussian_blur(&median, &smooth, 5, 1.0).at(stage)?;
    drop(pass);
    let _pass = scratch.working(stage, Kernel::Blend)?;
    ops::blend(&median, &smooth, gray, 0.6, 0.4).at(stage)
}

/// Writes 255 where both continuous bin positions exceed their thresholds.
/// Returns the foreground count.
fn classify(
    intensity: &[u8],
    neighborhood: &[u8],
    out: &mut [u8],
    bins: usize,
    best: &ThresholdPair,
) -> usize {
    let mut foreground = 0;
    for ((o, &i), &n) in out.iter_mut().zip(intensity).zip(neighborhood) {
        let fg = bin_position(i, bins) > best.intensity
            && bin_position(n, bins) > best.neighborhood;
        *o = if fg { 255 } else { 0 };
        foreground += fg as usize;
    }
    foreground
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;
    use pixel_buffer::PixelFormat;
    use std::sync::Arc;

    fn manager() -> MemoryManager {
        MemoryManager::new(MemoryBudget::from_mb(64))
    }

    fn two_halves(rows: usize, cols: usize, left: u8, right: u8) -> PixelBuffer {
        let data = (0..rows * cols)
            .map(|k| if k % cols < cols / 2 { left } else { right })
            .collect();
        PixelBuffer::from_vec(rows, cols, PixelFormat::Gray8, data).unwrap()
    }

    #[test]
    fn test_defaults_match_schema() {
        assert_eq!(
            Otsu2DParams::from_set(&ParameterSet::new()).unwrap(),
            Otsu2DParams::default()
        );
    }

    #[test]
    fn test_kernel_size() {
        assert_eq!(gaussian_kernel_size(0.0), 3);
        assert_eq!(gaussian_kernel_size(1.0), 7);
        assert_eq!(gaussian_kernel_size(1.5), 11);
        assert_eq!(gaussian_kernel_size(5.0), 15);
    }

    #[test]
    fn test_adaptive_bins() {
        assert_eq!(adaptive_bins(0, 255, 500_000), 128);
        assert_eq!(adaptive_bins(100, 120, 500_000), 32);
        assert_eq!(adaptive_bins(0, 150, 500_000), 64);
        assert_eq!(adaptive_bins(0, 255, 2_000_000), 256);
        assert_eq!(adaptive_bins(100, 120, 1000), 16);
        assert_eq!(adaptive_bins(0, 150, 1000), 32);
    }

    #[test]
    fn test_even_window_rejected_before_processing() {
        let m = manager();
        let input = two_halves(8, 8, 10, 200);
        let params = ParameterSet::new().with("window_size", 4);
        let err = Otsu2D
            .process(&input, &params, &ProcessingContext::new(), &m)
            .unwrap_err();
        match err {
            AlgorithmError::Validation(ValidationError::OutOfRange { name, value, .. }) => {
                assert_eq!(name, "window_size");
                assert_eq!(value, crate::ParamValue::Int(4));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(m.stats().allocations, 0);
    }

    #[test]
    fn test_classify_uses_position_within_bin() {
        // 70 sits at 17.29 of 64 bins: above 17.2 though its bin index is 17.
        let best = ThresholdPair {
            intensity: 17.2,
            neighborhood: 17.2,
            variance: 0.0,
        };
        let mut out = [0u8; 3];
        let fg = classify(&[70, 69, 70], &[70, 70, 69], &mut out, 64, &best);
        assert_eq!(out, [255, 0, 0]);
        assert_eq!(fg, 1);
    }

    #[test]
    fn test_uniform_image_gives_uniform_output() {
        let m = manager();
        let input = PixelBuffer::from_vec(8, 8, PixelFormat::Gray8, vec![128; 64]).unwrap();
        let out = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
            .unwrap();
        let pixels = out.image.to_vec().unwrap();
        assert!(pixels.iter().all(|&v| v == pixels[0]));
        assert!(pixels[0] == 0 || pixels[0] == 255);
    }

    #[test]
    fn test_separates_two_halves() {
        let m = manager();
        let input = two_halves(64, 64, 40, 210);
        let out = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
            .unwrap();
        assert_eq!(out.image.format(), PixelFormat::Gray8);
        assert_eq!(out.image.get(32, 4).unwrap(), 0);
        assert_eq!(out.image.get(32, 60).unwrap(), 255);
        let pixels = out.image.to_vec().unwrap();
        assert!(pixels.iter().all(|&v| v == 0 || v == 255));
        match out.report {
            AlgorithmReport::Otsu2D(r) => {
                assert_eq!(r.bins, 32);
                assert!(r.variance > 0.0);
                assert!(r.intensity_threshold_value() > 40.0);
                assert!(r.intensity_threshold_value() < 210.0);
                assert_eq!(r.foreground_pixels, pixels.iter().filter(|&&v| v == 255).count());
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn test_all_options_on_rgb_input() {
        let m = manager();
        let (rows, cols) = (40, 48);
        let data: Vec<u8> = (0..rows * cols)
            .flat_map(|k| {
                let v = if (k / cols) > rows / 2 { 220 } else { 30 };
                [v, v / 2, v]
            })
            .collect();
        let input = PixelBuffer::from_vec(rows, cols, PixelFormat::Rgb8, data).unwrap();
        let params: ParameterSet = [
            ("edge_preservation", true),
            ("noise_robustness", true),
            ("use_log_histogram", true),
            ("apply_contrast_enhancement", true),
        ]
        .into_iter()
        .collect();
        let params = params.with("window_size", 9).with("histogram_bins", 64);
        let out = Otsu2D
            .process(&input, &params, &ProcessingContext::new(), &m)
            .unwrap();
        assert_eq!((out.image.rows(), out.image.cols()), (rows, cols));
        assert!(out.image.to_vec().unwrap().iter().all(|&v| v == 0 || v == 255));
        // Only the output survives.
        assert_eq!(m.active_count(), 1);
        drop(out);
        assert_eq!(m.active_count(), 0);
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn test_cancel_before_histogram_leaks_nothing() {
        let m = manager();
        let input = two_halves(32, 32, 20, 230);
        let ctx = ProcessingContext::new();
        let token = ctx.token().clone();
        let ctx = ctx.with_observer(move |stage| {
            if stage == Stage::BuildHistogram {
                token.cancel();
            }
        });
        let err = Otsu2D
            .process(&input, &ParameterSet::new(), &ctx, &m)
            .unwrap_err();
        assert!(matches!(
            err,
            AlgorithmError::Cancelled {
                stage: Stage::BuildHistogram,
                ..
            }
        ));
        assert!(m.stats().allocations >= 3);
        assert_eq!(m.active_count(), 0);
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn test_memory_exhausted_surfaces_with_stage() {
        let m = MemoryManager::new(MemoryBudget::from_bytes(100));
        let input = two_halves(16, 16, 20, 230);
        let err = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
            .unwrap_err();
        assert!(err.is_memory_exhausted());
        assert_eq!(err.stage(), Some(Stage::Grayscale));
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn test_working_memory_counts_against_budget() {
        let input = two_halves(64, 64, 40, 210);
        let pass = Kernel::GaussianBlur.working_bytes(64, 64);

        // Room for the Gray8 intermediates, not for the f32 blur pass.
        let tight = MemoryManager::new(MemoryBudget::from_bytes(3 * 4096 + 512));
        let err = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &tight)
            .unwrap_err();
        assert!(err.is_memory_exhausted());
        assert_eq!(err.stage(), Some(Stage::GaussianBlur));
        assert_eq!(tight.used_bytes(), 0);
        assert_eq!(tight.reserved_bytes(), 0);
        assert_eq!(tight.active_count(), 0);

        let m = manager();
        let out = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
            .unwrap();
        assert!(m.stats().peak_used_bytes >= 2 * 4096 + pass);
        assert!(m.stats().reservations >= 3);
        assert_eq!(m.reserved_bytes(), 0);
        drop(out);
        assert_eq!(m.used_bytes(), 0);
    }

    #[test]
    fn test_closed_input_is_buffer_error() {
        let m = manager();
        let input = two_halves(4, 4, 0, 255);
        input.close();
        let err = Otsu2D
            .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
            .unwrap_err();
        assert!(matches!(
            err,
            AlgorithmError::Buffer {
                stage: Stage::Validate,
                ..
            }
        ));
    }

    #[test]
    fn test_concurrent_invocations_share_manager() {
        let m = manager();
        let input = Arc::new(two_halves(32, 32, 40, 210));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                let input = Arc::clone(&input);
                std::thread::spawn(move || {
                    Otsu2D
                        .process(&input, &ParameterSet::new(), &ProcessingContext::new(), &m)
                        .map(|out| out.image.to_vec().unwrap())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(m.active_count(), 0);
    }
}
