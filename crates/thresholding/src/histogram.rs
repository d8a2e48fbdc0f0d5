// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Histograms and the threshold searches that run over them.
//!
//! # 2-D search
//!
//! [`Histogram2D`] bins (intensity, neighbourhood mean) pairs. The
//! between-class variance for a threshold pair `(t1, t2)` compares the
//! quadrant `i ≤ t1, j ≤ t2` (class 0) against `i > t1, j > t2` (class 1).
//! Fractional thresholds weight the boundary bin row/column linearly, so
//! the search can land between bins. [`MomentTable`] holds prefix sums of
//! mass and first moments, making each evaluation O(1).

// ── Binning ──────────────────────────────────────────────────────

/// Continuous bin coordinate of an 8-bit value: `v · (bins − 1) / 255`.
#[inline]
pub fn bin_position(value: u8, bins: usize) -> f64 {
    value as f64 * (bins.saturating_sub(1)) as f64 / 255.0
}

/// Bin index of an 8-bit value, truncated and clamped to `bins − 1`.
#[inline]
pub fn bin_index(value: u8, bins: usize) -> usize {
    (bin_position(value, bins) as usize).min(bins.saturating_sub(1))
}

/// Inverse of [`bin_position`]: bin coordinate back to the 0..=255 scale.
#[inline]
pub fn bin_to_value(position: f64, bins: usize) -> f64 {
    if bins <= 1 {
        return 0.0;
    }
    position * 255.0 / (bins - 1) as f64
}

// ── 2-D histogram ────────────────────────────────────────────────

/// Joint histogram over (pixel intensity, neighbourhood mean).
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    bins: usize,
    counts: Vec<f64>,
}

impl Histogram2D {
    /// Counts every `(intensity[k], neighborhood[k])` pair.
    ///
    /// Extra samples in the longer slice are ignored.
    pub fn build(intensity: &[u8], neighborhood: &[u8], bins: usize) -> Self {
        let bins = bins.max(2);
        let mut counts = vec![0.0; bins * bins];
        for (&i, &j) in intensity.iter().zip(neighborhood) {
            counts[bin_index(i, bins) * bins + bin_index(j, bins)] += 1.0;
        }
        Self { bins, counts }
    }

    /// Peak bytes a threshold search over `bins` holds: the counts, the
    /// smoothing pass and the three moment tables.
    pub fn search_footprint_bytes(bins: usize) -> u64 {
        let n = bins.max(2) as u64;
        let stride = n + 1;
        let f = std::mem::size_of::<f64>() as u64;
        (2 * n * n + 3 * stride * stride) * f
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.counts[i * self.bins + j]
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// Replaces every count `c` with `ln(1 + c)`.
    pub fn apply_log_scale(&mut self) {
        for c in &mut self.counts {
            *c = c.ln_1p();
        }
    }

    /// Scales counts to sum to 1. No-op on an empty histogram.
    pub fn normalize(&mut self) {
        let total = self.total();
        if total > 0.0 {
            for c in &mut self.counts {
                *c /= total;
            }
        }
    }

    /// 2-D Gaussian smoothing with radius `⌊3σ⌋` and zero padding.
    pub fn smooth(&mut self, sigma: f64) {
        let radius = (3.0 * sigma) as usize;
        if sigma <= 0.0 || radius == 0 {
            return;
        }
        let kernel: Vec<f64> = (0..=2 * radius)
            .map(|k| {
                let d = k as f64 - radius as f64;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let norm: f64 = kernel.iter().sum();
        let kernel: Vec<f64> = kernel.iter().map(|w| w / norm).collect();

        let n = self.bins;
        let mut tmp = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let jj = j as isize + k as isize - radius as isize;
                    if (0..n as isize).contains(&jj) {
                        acc += w * self.counts[i * n + jj as usize];
                    }
                }
                tmp[i * n + j] = acc;
            }
        }
        for i in 0..n {
            for j in 0..n {
                let mut acc = 0.0;
                for (k, w) in kernel.iter().enumerate() {
                    let ii = i as isize + k as isize - radius as isize;
                    if (0..n as isize).contains(&ii) {
                        acc += w * tmp[ii as usize * n + j];
                    }
                }
                self.counts[i * n + j] = acc;
            }
        }
    }

    pub fn moments(&self) -> MomentTable {
        MomentTable::build(self)
    }
}

/// Mass and first moments of a histogram region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Moments {
    mass: f64,
    sum_i: f64,
    sum_j: f64,
}

impl Moments {
    fn add(self, other: Moments, weight: f64) -> Self {
        Self {
            mass: self.mass + weight * other.mass,
            sum_i: self.sum_i + weight * other.sum_i,
            sum_j: self.sum_j + weight * other.sum_j,
        }
    }
}

/// Variance below this is treated as zero.
const VARIANCE_EPSILON: f64 = 1e-9;

/// Prefix sums over a [`Histogram2D`] for O(1) class statistics.
#[derive(Debug, Clone)]
pub struct MomentTable {
    bins: usize,
    /// `(bins + 1)²` entries; `[i][j]` covers rows `< i`, cols `< j`.
    mass: Vec<f64>,
    sum_i: Vec<f64>,
    sum_j: Vec<f64>,
}

impl MomentTable {
    fn build(hist: &Histogram2D) -> Self {
        let n = hist.bins;
        let stride = n + 1;
        let mut mass = vec![0.0; stride * stride];
        let mut sum_i = vec![0.0; stride * stride];
        let mut sum_j = vec![0.0; stride * stride];
        for i in 0..n {
            for j in 0..n {
                let h = hist.get(i, j);
                let at = (i + 1) * stride + (j + 1);
                let up = i * stride + (j + 1);
                let left = (i + 1) * stride + j;
                let diag = i * stride + j;
                mass[at] = h + mass[up] + mass[left] - mass[diag];
                sum_i[at] = i as f64 * h + sum_i[up] + sum_i[left] - sum_i[diag];
                sum_j[at] = j as f64 * h + sum_j[up] + sum_j[left] - sum_j[diag];
            }
        }
        Self {
            bins: n,
            mass,
            sum_i,
            sum_j,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Moments over rows `i0..i1`, cols `j0..j1`, clamped to the table.
    fn rect(&self, i0: usize, i1: usize, j0: usize, j1: usize) -> Moments {
        let n = self.bins;
        let (i0, i1) = (i0.min(n), i1.min(n));
        let (j0, j1) = (j0.min(n), j1.min(n));
        if i0 >= i1 || j0 >= j1 {
            return Moments::default();
        }
        let stride = n + 1;
        let pick = |t: &[f64]| {
            t[i1 * stride + j1] - t[i0 * stride + j1] - t[i1 * stride + j0] + t[i0 * stride + j0]
        };
        Moments {
            mass: pick(&self.mass),
            sum_i: pick(&self.sum_i),
            sum_j: pick(&self.sum_j),
        }
    }

    /// Between-class variance `w0 · w1 · |μ0 − μ1|²` for thresholds in bin
    /// coordinates. Zero when either class is empty.
    pub fn between_class_variance(&self, t1: f64, t2: f64) -> f64 {
        let n = self.bins;
        let total = self.rect(0, n, 0, n).mass;
        if total <= 0.0 {
            return 0.0;
        }
        let max = (n - 1) as f64;
        let (t1, t2) = (t1.clamp(0.0, max), t2.clamp(0.0, max));
        let (f1, a1) = (t1.floor() as usize, t1.fract());
        let (f2, a2) = (t2.floor() as usize, t2.fract());

        // Class 0: full rows/cols up to f, the next one weighted by the fraction.
        let c0 = self
            .rect(0, f1 + 1, 0, f2 + 1)
            .add(self.rect(f1 + 1, f1 + 2, 0, f2 + 1), a1)
            .add(self.rect(0, f1 + 1, f2 + 1, f2 + 2), a2)
            .add(self.rect(f1 + 1, f1 + 2, f2 + 1, f2 + 2), a1 * a2);
        // Class 1: the complementary weights.
        let (b1, b2) = (1.0 - a1, 1.0 - a2);
        let c1 = self
            .rect(f1 + 2, n, f2 + 2, n)
            .add(self.rect(f1 + 1, f1 + 2, f2 + 2, n), b1)
            .add(self.rect(f1 + 2, n, f2 + 1, f2 + 2), b2)
            .add(self.rect(f1 + 1, f1 + 2, f2 + 1, f2 + 2), b1 * b2);

        if c0.mass <= VARIANCE_EPSILON || c1.mass <= VARIANCE_EPSILON {
            return 0.0;
        }
        let (w0, w1) = (c0.mass / total, c1.mass / total);
        let di = c0.sum_i / c0.mass - c1.sum_i / c1.mass;
        let dj = c0.sum_j / c0.mass - c1.sum_j / c1.mass;
        let var = w0 * w1 * (di * di + dj * dj);
        if var < VARIANCE_EPSILON {
            0.0
        } else {
            var
        }
    }
}

/// Result of the 2-D threshold search.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ThresholdPair {
    /// Intensity threshold, in bin coordinates.
    pub intensity: f64,
    /// Neighbourhood threshold, in bin coordinates.
    pub neighborhood: f64,
    pub variance: f64,
}

/// Search step in bin coordinates.
const SEARCH_STEP: f64 = 0.1;
/// Half-width of the refinement window around the diagonal optimum.
const REFINE_RADIUS: f64 = 5.0;

/// Maximises between-class variance: a diagonal pass over `t1 = t2`, then
/// a 2-D refinement around the best diagonal point.
///
/// Starts from `(bins/2, bins/2)` and only moves on strictly larger
/// variance, so a histogram with no separable split keeps the midpoint.
pub fn search_thresholds(table: &MomentTable) -> ThresholdPair {
    let n = table.bins();
    let max = (n - 1) as f64;
    let mid = (n / 2) as f64;
    let mut best = ThresholdPair {
        intensity: mid,
        neighborhood: mid,
        variance: 0.0,
    };

    let diagonal_steps = ((max - 1.0) / SEARCH_STEP).round().max(0.0) as usize;
    for k in 0..diagonal_steps {
        let t = 1.0 + k as f64 * SEARCH_STEP;
        let var = table.between_class_variance(t, t);
        if var > best.variance {
            best = ThresholdPair {
                intensity: t,
                neighborhood: t,
                variance: var,
            };
        }
    }

    let window = |centre: f64| {
        let lo = (centre - REFINE_RADIUS).max(1.0);
        let hi = (centre + REFINE_RADIUS).min(max);
        let steps = ((hi - lo) / SEARCH_STEP).round().max(0.0) as usize;
        (lo, steps)
    };
    let (lo1, steps1) = window(best.intensity);
    let (lo2, steps2) = window(best.neighborhood);
    for a in 0..steps1 {
        let t1 = lo1 + a as f64 * SEARCH_STEP;
        for b in 0..steps2 {
            let t2 = lo2 + b as f64 * SEARCH_STEP;
            let var = table.between_class_variance(t1, t2);
            if var > best.variance {
                best = ThresholdPair {
                    intensity: t1,
                    neighborhood: t2,
                    variance: var,
                };
            }
        }
    }

    best.intensity = best.intensity.clamp(0.0, max);
    best.neighborhood = best.neighborhood.clamp(0.0, max);
    best
}

// ── 1-D histogram ────────────────────────────────────────────────

/// Histogram of the non-zero samples of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    counts: Vec<u64>,
}

impl Histogram1D {
    /// Counts every sample greater than zero.
    pub fn from_nonzero(samples: &[u8], bins: usize) -> Self {
        let bins = bins.max(2);
        let mut counts = vec![0u64; bins];
        for &v in samples.iter().filter(|&&v| v > 0) {
            counts[bin_index(v, bins)] += 1;
        }
        Self { counts }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Mean bin, or `None` when empty.
    pub fn mean_bin(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let sum: f64 = self
            .counts
            .iter()
            .enumerate()
            .map(|(i, &c)| i as f64 * c as f64)
            .sum();
        Some(sum / total as f64)
    }

    /// Interpolated median bin, or `None` when empty.
    pub fn median_bin(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let half = total as f64 / 2.0;
        let mut cumulative = 0.0;
        for (i, &c) in self.counts.iter().enumerate() {
            cumulative += c as f64;
            if cumulative >= half && c > 0 {
                let excess = cumulative - half;
                return Some((i as f64 - excess / c as f64).max(0.0));
            }
        }
        Some((self.bins() - 1) as f64)
    }

    /// Otsu threshold in bin coordinates, searched in 0.1-bin steps with
    /// the boundary bin split fractionally between the two classes.
    ///
    /// When the maximum spans a run of consecutive steps (an empty gap
    /// between two modes) the midpoint of the run is returned. Returns
    /// `None` when empty; falls back to the mean bin when no split
    /// separates two non-empty classes.
    pub fn otsu_bin(&self) -> Option<f64> {
        let total = self.total() as f64;
        if total == 0.0 {
            return None;
        }
        let n = self.bins();
        let mut cum_mass = vec![0.0; n + 1];
        let mut cum_sum = vec![0.0; n + 1];
        for (i, &c) in self.counts.iter().enumerate() {
            cum_mass[i + 1] = cum_mass[i] + c as f64;
            cum_sum[i + 1] = cum_sum[i] + i as f64 * c as f64;
        }
        let sum_all = cum_sum[n];

        let mut best_var = 0.0;
        let mut run: Option<(f64, f64)> = None;
        let mut extending = false;
        let steps = ((n - 1) as f64 / SEARCH_STEP).round() as usize;
        for k in 0..=steps {
            let t = k as f64 * SEARCH_STEP;
            let (f, a) = (t.floor() as usize, t.fract());
            let mut w_b = cum_mass[(f + 1).min(n)];
            let mut s_b = cum_sum[(f + 1).min(n)];
            if f + 1 < n {
                let c = self.counts[f + 1] as f64;
                w_b += a * c;
                s_b += a * (f + 1) as f64 * c;
            }
            let w_f = total - w_b;
            if w_b <= VARIANCE_EPSILON || w_f <= VARIANCE_EPSILON {
                extending = false;
                continue;
            }
            let diff = s_b / w_b - (sum_all - s_b) / w_f;
            let var = w_b * w_f * diff * diff;
            let tolerance = best_var * 1e-12;
            if var > best_var + tolerance {
                best_var = var;
                run = Some((t, t));
                extending = true;
            } else if extending && (var - best_var).abs() <= tolerance {
                if let Some((_, end)) = run.as_mut() {
                    *end = t;
                }
            } else {
                extending = false;
            }
        }
        run.map(|(start, end)| (start + end) / 2.0)
            .or_else(|| self.mean_bin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_mapping() {
        assert_eq!(bin_index(0, 64), 0);
        assert_eq!(bin_index(255, 64), 63);
        assert_eq!(bin_index(128, 16), 7);
        assert!((bin_to_value(bin_position(200, 32), 32) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_counts_sum_to_samples() {
        let a: Vec<u8> = (0..=255).collect();
        let b: Vec<u8> = (0..=255).rev().collect();
        let h = Histogram2D::build(&a, &b, 64);
        assert_eq!(h.total(), 256.0);
        assert_eq!(h.bins(), 64);
        let h1 = Histogram1D::from_nonzero(&a, 64);
        assert_eq!(h1.total(), 255);
    }

    #[test]
    fn test_search_footprint() {
        let h = Histogram2D::build(&[1, 2], &[3, 4], 16);
        let table = h.moments();
        let held = (h.counts.len() * 2 + table.mass.len() * 3) * std::mem::size_of::<f64>();
        assert_eq!(Histogram2D::search_footprint_bytes(16), held as u64);
        assert_eq!(
            Histogram2D::search_footprint_bytes(0),
            Histogram2D::search_footprint_bytes(2)
        );
    }

    #[test]
    fn test_log_normalize_smooth() {
        let a = vec![10u8; 100];
        let mut h = Histogram2D::build(&a, &a, 32);
        h.apply_log_scale();
        h.normalize();
        assert!((h.total() - 1.0).abs() < 1e-9);
        h.smooth(1.0);
        // Zero padding leaks some mass at most; never creates any.
        assert!(h.total() <= 1.0 + 1e-9);
        let peak = bin_index(10, 32);
        assert!(h.get(peak, peak) > h.get(peak + 1, peak));
    }

    #[test]
    fn test_variance_matches_brute_force_on_integer_thresholds() {
        let a: Vec<u8> = (0..400u32).map(|k| ((k * 37) % 256) as u8).collect();
        let b: Vec<u8> = (0..400u32).map(|k| ((k * 91 + 13) % 256) as u8).collect();
        let h = Histogram2D::build(&a, &b, 16);
        let table = h.moments();
        let total = h.total();
        for t1 in 1..14usize {
            for t2 in 1..14usize {
                let (mut w0, mut i0, mut j0, mut w1, mut i1, mut j1) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
                for i in 0..16 {
                    for j in 0..16 {
                        let c = h.get(i, j);
                        if i <= t1 && j <= t2 {
                            w0 += c;
                            i0 += i as f64 * c;
                            j0 += j as f64 * c;
                        } else if i > t1 && j > t2 {
                            w1 += c;
                            i1 += i as f64 * c;
                            j1 += j as f64 * c;
                        }
                    }
                }
                let expected = if w0 > 0.0 && w1 > 0.0 {
                    let di = i0 / w0 - i1 / w1;
                    let dj = j0 / w0 - j1 / w1;
                    (w0 / total) * (w1 / total) * (di * di + dj * dj)
                } else {
                    0.0
                };
                let got = table.between_class_variance(t1 as f64, t2 as f64);
                assert!((got - expected).abs() < 1e-9, "({t1},{t2}): {got} vs {expected}");
            }
        }
    }

    #[test]
    fn test_search_separates_two_clusters() {
        let mut a = vec![30u8; 500];
        a.extend(vec![220u8; 500]);
        let h = Histogram2D::build(&a, &a, 64);
        let best = search_thresholds(&h.moments());
        let lo = bin_position(30, 64);
        let hi = bin_position(220, 64);
        assert!(best.variance > 0.0);
        assert!(best.intensity >= lo.floor() && best.intensity < hi);
        assert!(best.neighborhood >= lo.floor() && best.neighborhood < hi);
    }

    #[test]
    fn test_search_uniform_keeps_midpoint() {
        let a = vec![128u8; 64];
        let h = Histogram2D::build(&a, &a, 16);
        let best = search_thresholds(&h.moments());
        assert_eq!(best.variance, 0.0);
        assert_eq!(best.intensity, 8.0);
        assert_eq!(best.neighborhood, 8.0);
    }

    #[test]
    fn test_otsu_1d_bimodal() {
        let mut samples = vec![40u8; 300];
        samples.extend(vec![200u8; 300]);
        let h = Histogram1D::from_nonzero(&samples, 64);
        let t = bin_to_value(h.otsu_bin().unwrap(), 64);
        assert!(t > 40.0 && t < 200.0, "threshold {t}");
    }

    #[test]
    fn test_1d_empty_and_single_value() {
        let empty = Histogram1D::from_nonzero(&[0, 0, 0], 32);
        assert_eq!(empty.otsu_bin(), None);
        assert_eq!(empty.mean_bin(), None);
        assert_eq!(empty.median_bin(), None);

        let flat = Histogram1D::from_nonzero(&[100; 10], 32);
        let expected = bin_index(100, 32) as f64;
        assert_eq!(flat.otsu_bin(), Some(expected));
        assert_eq!(flat.mean_bin(), Some(expected));
    }

    #[test]
    fn test_median_interpolates() {
        let h = Histogram1D { counts: vec![0, 2, 2, 0] };
        // Half of four samples is reached exactly at the end of bin 1.
        assert_eq!(h.median_bin(), Some(1.0));
        let h = Histogram1D { counts: vec![4, 0, 0, 0] };
        assert_eq!(h.median_bin(), Some(0.0));
    }
}
