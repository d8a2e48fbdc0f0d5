// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Contrast-limited adaptive histogram equalisation (CLAHE).
//!
//! The image is split into a `grid × grid` mesh of tiles. Each tile gets its
//! own clipped-histogram lookup table, and each output pixel bilinearly
//! interpolates the LUTs of the four nearest tile centres so tile seams do
//! not show.

use super::ensure_gray_pair;
use crate::{BufferError, PixelBuffer};

/// CLAHE settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClaheParams {
    /// Clip limit as a multiple of the uniform bin height (`tile_area / 256`).
    /// Zero disables clipping.
    pub clip_limit: f32,
    /// Tiles per axis.
    pub grid: usize,
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            clip_limit: 40.0,
            grid: 8,
        }
    }
}

/// Equalises `src` into `dst`.
pub fn equalize_adaptive(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    params: ClaheParams,
) -> Result<(), BufferError> {
    if params.grid == 0 {
        return Err(BufferError::Kernel {
            op: "equalize_adaptive",
            detail: "tile grid must be positive".into(),
        });
    }
    ensure_gray_pair(src, dst, "equalize_adaptive")?;
    let (rows, cols) = (src.rows(), src.cols());
    src.transform_into(dst, "equalize_adaptive", |s, d| {
        clahe_slice(s, d, rows, cols, params)
    })
}

fn clahe_slice(src: &[u8], dst: &mut [u8], rows: usize, cols: usize, params: ClaheParams) {
    let tile_h = rows.div_ceil(params.grid).max(1);
    let tile_w = cols.div_ceil(params.grid).max(1);
    let tiles_y = rows.div_ceil(tile_h);
    let tiles_x = cols.div_ceil(tile_w);

    let mut luts = vec![[0u8; 256]; tiles_y * tiles_x];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (y0, x0) = (ty * tile_h, tx * tile_w);
            let (y1, x1) = ((y0 + tile_h).min(rows), (x0 + tile_w).min(cols));
            let area = (y1 - y0) * (x1 - x0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &v in &src[y * cols + x0..y * cols + x1] {
                    hist[v as usize] += 1;
                }
            }
            if params.clip_limit > 0.0 {
                clip_histogram(&mut hist, area, params.clip_limit);
            }
            luts[ty * tiles_x + tx] = build_lut(&hist, area);
        }
    }

    let centre = |t: usize, size: usize| (t as f32 + 0.5) * size as f32;
    for y in 0..rows {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ay = if ty0 == ty1 {
            0.0
        } else {
            ((y as f32 + 0.5 - centre(ty0, tile_h)) / tile_h as f32).clamp(0.0, 1.0)
        };

        for x in 0..cols {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ax = if tx0 == tx1 {
                0.0
            } else {
                ((x as f32 + 0.5 - centre(tx0, tile_w)) / tile_w as f32).clamp(0.0, 1.0)
            };

            let v = src[y * cols + x] as usize;
            let v00 = luts[ty0 * tiles_x + tx0][v] as f32;
            let v10 = luts[ty0 * tiles_x + tx1][v] as f32;
            let v01 = luts[ty1 * tiles_x + tx0][v] as f32;
            let v11 = luts[ty1 * tiles_x + tx1][v] as f32;

            let val = v00 * (1.0 - ax) * (1.0 - ay)
                + v10 * ax * (1.0 - ay)
                + v01 * (1.0 - ax) * ay
                + v11 * ax * ay;
            dst[y * cols + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clips bins above `ceil(area / 256 · multiplier)` and spreads the excess
/// evenly over all bins.
fn clip_histogram(hist: &mut [u32; 256], area: usize, multiplier: f32) {
    let clip = ((area as f32 / 256.0) * multiplier).ceil().max(1.0) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += per_bin;
        if i < remainder {
            *bin += 1;
        }
    }
}

/// Scaled CDF: `lut[v] = round(255 · cdf[v] / area)`.
fn build_lut(hist: &[u32; 256], area: usize) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        return lut;
    }
    let scale = 255.0 / area as f32;
    let mut cdf = 0u32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
