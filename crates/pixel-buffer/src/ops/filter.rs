// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Smoothing filters: Gaussian, median, box mean, weighted blend, and
//! non-local means.
//!
//! Gaussian blur mirrors edges without repeating them (reflect-101); the
//! median and non-local-means filters replicate edge samples.

use super::{ensure_gray_pair, reflect101, replicate, SummedAreaTable};
use crate::{BufferError, PixelBuffer};

/// Builds a normalised 1D Gaussian kernel of odd length `ksize`.
///
/// A non-positive `sigma` is derived from the kernel size as
/// `0.3 · ((ksize − 1) · 0.5 − 1) + 0.8`.
pub fn gaussian_kernel(ksize: usize, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (ksize / 2) as f64;
    let denom = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - radius;
            (-(x * x) / denom).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|&w| (w / sum) as f32).collect()
}

fn ensure_odd(ksize: usize, op: &'static str) -> Result<(), BufferError> {
    if ksize == 0 || ksize % 2 == 0 {
        return Err(BufferError::Kernel {
            op,
            detail: format!("kernel size {ksize} must be odd and positive"),
        });
    }
    Ok(())
}

/// Separable Gaussian blur with a `ksize × ksize` kernel.
pub fn gaussian_blur(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    ksize: usize,
    sigma: f64,
) -> Result<(), BufferError> {
    ensure_odd(ksize, "gaussian_blur")?;
    ensure_gray_pair(src, dst, "gaussian_blur")?;
    let (rows, cols) = (src.rows(), src.cols());
    let kernel = gaussian_kernel(ksize, sigma);
    src.transform_into(dst, "gaussian_blur", |s, d| {
        convolve_separable(s, d, rows, cols, &kernel)
    })
}

fn convolve_separable(src: &[u8], dst: &mut [u8], rows: usize, cols: usize, kernel: &[f32]) {
    let radius = (kernel.len() / 2) as isize;
    let mut horizontal = vec![0f32; rows * cols];

    for r in 0..rows {
        let row = &src[r * cols..(r + 1) * cols];
        for c in 0..cols {
            let mut acc = 0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let cc = reflect101(c as isize + k as isize - radius, cols);
                acc += w * row[cc] as f32;
            }
            horizontal[r * cols + c] = acc;
        }
    }

    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let rr = reflect101(r as isize + k as isize - radius, rows);
                acc += w * horizontal[rr * cols + c];
            }
            dst[r * cols + c] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Median filter over a `ksize × ksize` window.
pub fn median_blur(src: &PixelBuffer, dst: &PixelBuffer, ksize: usize) -> Result<(), BufferError> {
    ensure_odd(ksize, "median_blur")?;
    if ksize < 3 {
        return Err(BufferError::Kernel {
            op: "median_blur",
            detail: format!("kernel size {ksize} must be at least 3"),
        });
    }
    ensure_gray_pair(src, dst, "median_blur")?;
    let (rows, cols) = (src.rows(), src.cols());
    src.transform_into(dst, "median_blur", |s, d| median_slice(s, d, rows, cols, ksize))
}

pub(crate) fn median_slice(src: &[u8], dst: &mut [u8], rows: usize, cols: usize, ksize: usize) {
    let radius = (ksize / 2) as isize;
    let mut window = Vec::with_capacity(ksize * ksize);
    let mid = ksize * ksize / 2;

    for r in 0..rows {
        for c in 0..cols {
            window.clear();
            for dy in -radius..=radius {
                let rr = replicate(r as isize + dy, rows);
                for dx in -radius..=radius {
                    let cc = replicate(c as isize + dx, cols);
                    window.push(src[rr * cols + cc]);
                }
            }
            let (_, median, _) = window.select_nth_unstable(mid);
            dst[r * cols + c] = *median;
        }
    }
}

/// Mean over a `(2·radius + 1)²` window clipped to the image.
pub fn box_mean(src: &PixelBuffer, dst: &PixelBuffer, radius: usize) -> Result<(), BufferError> {
    ensure_gray_pair(src, dst, "box_mean")?;
    let (rows, cols) = (src.rows(), src.cols());
    let window = 2 * radius + 1;
    src.transform_into(dst, "box_mean", |s, d| {
        let table = SummedAreaTable::from_samples(s, rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                d[r * cols + c] = table.window_mean(r, c, window);
            }
        }
    })
}

/// Writes `weight_a · a + weight_b · b` into `dst`, truncated to `u8`.
pub fn blend(
    a: &PixelBuffer,
    b: &PixelBuffer,
    dst: &PixelBuffer,
    weight_a: f32,
    weight_b: f32,
) -> Result<(), BufferError> {
    ensure_gray_pair(a, dst, "blend")?;
    ensure_gray_pair(b, dst, "blend")?;
    let b_samples = b.to_vec()?;
    a.transform_into(dst, "blend", |s, d| {
        for ((out, &x), &y) in d.iter_mut().zip(s).zip(&b_samples) {
            *out = (weight_a * x as f32 + weight_b * y as f32).clamp(0.0, 255.0) as u8;
        }
    })
}

/// Parameters for [`non_local_means`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlMeansParams {
    /// Filter strength; larger values smooth more.
    pub h: f32,
    /// Side of the square patch compared between pixels (odd).
    pub patch_size: usize,
    /// Side of the square search window around each pixel (odd).
    pub search_size: usize,
}

impl Default for NlMeansParams {
    fn default() -> Self {
        Self {
            h: 3.0,
            patch_size: 3,
            search_size: 7,
        }
    }
}

/// Non-local means denoising.
///
/// Each output pixel is the average of the pixels in its search window,
/// weighted by `exp(−d² / h²)` where `d²` is the mean squared difference
/// between the two surrounding patches.
pub fn non_local_means(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    params: NlMeansParams,
) -> Result<(), BufferError> {
    ensure_odd(params.patch_size, "non_local_means")?;
    ensure_odd(params.search_size, "non_local_means")?;
    if params.h <= 0.0 {
        return Err(BufferError::Kernel {
            op: "non_local_means",
            detail: format!("filter strength {} must be positive", params.h),
        });
    }
    ensure_gray_pair(src, dst, "non_local_means")?;
    let (rows, cols) = (src.rows(), src.cols());
    src.transform_into(dst, "non_local_means", |s, d| {
        nl_means_slice(s, d, rows, cols, params)
    })
}

fn nl_means_slice(src: &[u8], dst: &mut [u8], rows: usize, cols: usize, params: NlMeansParams) {
    let patch_r = (params.patch_size / 2) as isize;
    let search_r = (params.search_size / 2) as isize;
    let patch_area = (params.patch_size * params.patch_size) as f32;
    let h2 = params.h * params.h;
    let at = |r: isize, c: isize| src[replicate(r, rows) * cols + replicate(c, cols)] as f32;

    for r in 0..rows as isize {
        for c in 0..cols as isize {
            let mut weight_sum = 0f32;
            let mut acc = 0f32;
            for sy in -search_r..=search_r {
                for sx in -search_r..=search_r {
                    let (qr, qc) = (r + sy, c + sx);
                    let mut dist = 0f32;
                    for py in -patch_r..=patch_r {
                        for px in -patch_r..=patch_r {
                            let diff = at(r + py, c + px) - at(qr + py, qc + px);
                            dist += diff * diff;
                        }
                    }
                    let w = (-(dist / patch_area) / h2).exp();
                    weight_sum += w;
                    acc += w * at(qr, qc);
                }
            }
            // The centre pixel always contributes weight 1.
            dst[r as usize * cols + c as usize] = (acc / weight_sum).round().clamp(0.0, 255.0) as u8;
        }
    }
}
