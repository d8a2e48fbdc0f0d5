// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Binarization quality against a ground-truth image.
//!
//! Both images are reduced to binary masks (a pixel is foreground when its
//! luma is above 127) and compared pixel by pixel.

use crate::PipelineError;
use pixel_buffer::{ops, PixelBuffer};

/// Luma above this value counts as foreground.
pub const FOREGROUND_CUTOFF: u8 = 127;

/// Side of the DRD weight window.
const DRD_WINDOW: usize = 5;

/// Pixel counts of the four agreement classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn total(&self) -> usize {
        self.true_positives + self.true_negatives + self.false_positives + self.false_negatives
    }

    /// `TP / (TP + FP)`; 0 when nothing was predicted foreground.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// `TP / (TP + FN)`; 0 when the ground truth has no foreground.
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall.
    pub fn f_measure(&self) -> f64 {
        self.f_beta(1.0)
    }

    /// F-measure with β = 0.5, weighting precision over recall.
    pub fn pseudo_f_measure(&self) -> f64 {
        self.f_beta(0.5)
    }

    fn f_beta(&self, beta: f64) -> f64 {
        if self.true_positives == 0 {
            return 0.0;
        }
        let (p, r) = (self.precision(), self.recall());
        let b2 = beta * beta;
        let denom = b2 * p + r;
        if denom == 0.0 {
            return 0.0;
        }
        (1.0 + b2) * p * r / denom
    }

    /// Negative rate metric: `(FN + FP) / (2 · (TP + TN))`, 1 when nothing
    /// agrees.
    pub fn nrm(&self) -> f64 {
        let denom = 2 * (self.true_positives + self.true_negatives);
        if denom == 0 {
            return 1.0;
        }
        (self.false_negatives + self.false_positives) as f64 / denom as f64
    }

    /// Mean of the background clutter rate (`FP / background`) and the
    /// foreground speckle rate (`FN / foreground`).
    pub fn pbc(&self) -> f64 {
        let clutter = ratio(self.false_positives, self.false_positives + self.true_negatives);
        let speckle = ratio(self.false_negatives, self.false_negatives + self.true_positives);
        (clutter + speckle) / 2.0
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// All quality measures for one comparison.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QualityReport {
    pub confusion: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f_measure: f64,
    pub pseudo_f_measure: f64,
    pub nrm: f64,
    /// Distance-reciprocal distortion.
    pub drd: f64,
    pub pbc: f64,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "F-measure {:.4}, pseudo-F {:.4}, precision {:.4}, recall {:.4}, \
             NRM {:.4}, DRD {:.4}, PBC {:.4} ({} px)",
            self.f_measure,
            self.pseudo_f_measure,
            self.precision,
            self.recall,
            self.nrm,
            self.drd,
            self.pbc,
            self.confusion.total(),
        )
    }
}

/// Compares `result` against `ground_truth`.
///
/// Color inputs are reduced to luma first. Sizes must match.
pub fn evaluate(
    result: &PixelBuffer,
    ground_truth: &PixelBuffer,
) -> Result<QualityReport, PipelineError> {
    if result.rows() != ground_truth.rows() || result.cols() != ground_truth.cols() {
        return Err(PipelineError::DimensionMismatch {
            expected_rows: ground_truth.rows(),
            expected_cols: ground_truth.cols(),
            actual_rows: result.rows(),
            actual_cols: result.cols(),
        });
    }
    let (rows, cols) = (result.rows(), result.cols());
    let predicted = binary_mask(result)?;
    let truth = binary_mask(ground_truth)?;

    let confusion = confusion_matrix(&predicted, &truth);
    let drd = drd(&predicted, &truth, rows, cols);

    let report = QualityReport {
        confusion,
        precision: confusion.precision(),
        recall: confusion.recall(),
        f_measure: confusion.f_measure(),
        pseudo_f_measure: confusion.pseudo_f_measure(),
        nrm: confusion.nrm(),
        drd,
        pbc: confusion.pbc(),
    };
    tracing::debug!(
        component = "quality",
        f_measure = report.f_measure,
        drd = report.drd,
        "evaluated result against ground truth"
    );
    Ok(report)
}

fn binary_mask(buffer: &PixelBuffer) -> Result<Vec<bool>, PipelineError> {
    let channels = buffer.channels();
    let mask: Vec<bool> = buffer.with_data("quality", |data| {
        data.chunks_exact(channels)
            .map(|px| {
                let v = if channels >= 3 {
                    ops::luma(px[0], px[1], px[2])
                } else {
                    px[0]
                };
                v > FOREGROUND_CUTOFF
            })
            .collect()
    })?;
    Ok(mask)
}

pub fn confusion_matrix(predicted: &[bool], truth: &[bool]) -> ConfusionMatrix {
    let mut m = ConfusionMatrix::default();
    for (&p, &t) in predicted.iter().zip(truth) {
        match (t, p) {
            (true, true) => m.true_positives += 1,
            (false, false) => m.true_negatives += 1,
            (false, true) => m.false_positives += 1,
            (true, false) => m.false_negatives += 1,
        }
    }
    m
}

fn drd_weights() -> [[f64; DRD_WINDOW]; DRD_WINDOW] {
    let c = (DRD_WINDOW / 2) as f64;
    let mut w = [[0.0; DRD_WINDOW]; DRD_WINDOW];
    for (i, row) in w.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            let d = ((i as f64 - c).powi(2) + (j as f64 - c).powi(2)).sqrt();
            *cell = if d == 0.0 { 1.0 } else { 1.0 / d };
        }
    }
    w
}

/// Sum over mismatched pixels of the weighted ground-truth foreground share
/// in their 5×5 neighbourhood, divided by the ground-truth foreground count.
/// Out-of-image neighbours carry no weight.
fn drd(predicted: &[bool], truth: &[bool], rows: usize, cols: usize) -> f64 {
    let foreground = truth.iter().filter(|&&t| t).count();
    if foreground == 0 {
        return 0.0;
    }
    let weights = drd_weights();
    let half = (DRD_WINDOW / 2) as isize;

    let mut distortion = 0.0;
    for r in 0..rows {
        for c in 0..cols {
            let idx = r * cols + c;
            if predicted[idx] == truth[idx] {
                continue;
            }
            let (mut hit, mut total) = (0.0, 0.0);
            for (i, wrow) in weights.iter().enumerate() {
                for (j, &w) in wrow.iter().enumerate() {
                    let rr = r as isize + i as isize - half;
                    let cc = c as isize + j as isize - half;
                    if rr < 0 || cc < 0 || rr >= rows as isize || cc >= cols as isize {
                        continue;
                    }
                    total += w;
                    if truth[rr as usize * cols + cc as usize] {
                        hit += w;
                    }
                }
            }
            if total > 0.0 {
                distortion += hit / total;
            }
        }
    }
    distortion / foreground as f64
}
