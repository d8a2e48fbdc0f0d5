// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Summed-area tables.
//!
//! The table has one extra leading row and column of zeros so that any
//! rectangle sum is four lookups:
//!
//! ```text
//! sum[top..bottom, left..right] = S[bottom][right] − S[top][right]
//!                                − S[bottom][left] + S[top][left]
//! ```

use super::ensure_gray_pair;
use crate::{BufferError, PixelBuffer, PixelFormat};

/// 2D prefix sums over an 8-bit image, built in one pass.
#[derive(Debug, Clone)]
pub struct SummedAreaTable {
    rows: usize,
    cols: usize,
    sums: Vec<u64>,
}

impl SummedAreaTable {
    /// Builds the table from a `Gray8` buffer.
    pub fn build(buffer: &PixelBuffer) -> Result<Self, BufferError> {
        buffer.ensure_format(PixelFormat::Gray8, "summed_area_table")?;
        let (rows, cols) = (buffer.rows(), buffer.cols());
        buffer.with_data("summed_area_table", |s| Self::from_samples(s, rows, cols))
    }

    /// Builds the table from raw row-major samples.
    pub fn from_samples(samples: &[u8], rows: usize, cols: usize) -> Self {
        let stride = cols + 1;
        let mut sums = vec![0u64; (rows + 1) * stride];
        for r in 0..rows {
            let mut row_sum = 0u64;
            for c in 0..cols {
                row_sum += samples[r * cols + c] as u64;
                sums[(r + 1) * stride + c + 1] = sums[r * stride + c + 1] + row_sum;
            }
        }
        Self { rows, cols, sums }
    }

    /// Bytes of the table built for a `rows × cols` image.
    pub fn footprint_bytes(rows: usize, cols: usize) -> u64 {
        (rows as u64 + 1) * (cols as u64 + 1) * std::mem::size_of::<u64>() as u64
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Sum over the half-open rectangle `[top, bottom) × [left, right)`.
    ///
    /// Bounds are clamped to the image.
    pub fn rect_sum(&self, top: usize, left: usize, bottom: usize, right: usize) -> u64 {
        let bottom = bottom.min(self.rows);
        let right = right.min(self.cols);
        if top >= bottom || left >= right {
            return 0;
        }
        let stride = self.cols + 1;
        let at = |r: usize, c: usize| self.sums[r * stride + c];
        at(bottom, right) + at(top, left) - at(top, right) - at(bottom, left)
    }

    /// Integer mean of the `window × window` neighbourhood centred on
    /// `(row, col)`, clipped to the image.
    pub fn window_mean(&self, row: usize, col: usize, window: usize) -> u8 {
        let half = window / 2;
        let top = row.saturating_sub(half);
        let left = col.saturating_sub(half);
        let bottom = (row + half + 1).min(self.rows);
        let right = (col + half + 1).min(self.cols);
        let area = ((bottom - top) * (right - left)) as u64;
        if area == 0 {
            return 0;
        }
        (self.rect_sum(top, left, bottom, right) / area) as u8
    }
}

/// Writes the `window × window` local mean of every pixel of `src` into `dst`.
///
/// Runs in `O(rows · cols)` regardless of window size.
pub fn local_mean(src: &PixelBuffer, dst: &PixelBuffer, window: usize) -> Result<(), BufferError> {
    if window == 0 {
        return Err(BufferError::Kernel {
            op: "local_mean",
            detail: "window must be positive".into(),
        });
    }
    ensure_gray_pair(src, dst, "local_mean")?;
    let (rows, cols) = (src.rows(), src.cols());
    src.transform_into(dst, "local_mean", |s, d| {
        let table = SummedAreaTable::from_samples(s, rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                d[r * cols + c] = table.window_mean(r, c, window);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_sum(s: &[u8], cols: usize, top: usize, left: usize, bottom: usize, right: usize) -> u64 {
        let mut total = 0;
        for r in top..bottom {
            for c in left..right {
                total += s[r * cols + c] as u64;
            }
        }
        total
    }

    #[test]
    fn test_rect_sum_matches_brute_force() {
        let (rows, cols) = (7, 9);
        let samples: Vec<u8> = (0..rows * cols).map(|i| (i * 37 % 256) as u8).collect();
        let table = SummedAreaTable::from_samples(&samples, rows, cols);
        for (t, l, b, r) in [(0, 0, 7, 9), (1, 2, 4, 5), (3, 3, 4, 4), (6, 0, 7, 9)] {
            assert_eq!(table.rect_sum(t, l, b, r), brute_sum(&samples, cols, t, l, b, r));
        }
    }

    #[test]
    fn test_rect_sum_empty_and_clamped() {
        let table = SummedAreaTable::from_samples(&[1, 1, 1, 1], 2, 2);
        assert_eq!(table.rect_sum(1, 1, 1, 2), 0);
        assert_eq!(table.rect_sum(0, 0, 10, 10), 4);
    }

    #[test]
    fn test_window_mean_clips_at_border() {
        let table = SummedAreaTable::from_samples(&[0, 10, 20, 30, 40, 50, 60, 70, 80], 3, 3);
        // Centre: full 3×3 mean.
        assert_eq!(table.window_mean(1, 1, 3), 40);
        // Corner: only the 2×2 block inside the image.
        assert_eq!(table.window_mean(0, 0, 3), (0 + 10 + 30 + 40) / 4);
    }

    #[test]
    fn test_footprint_matches_table() {
        let table = SummedAreaTable::from_samples(&[0; 12], 3, 4);
        let actual = (table.sums.len() * std::mem::size_of::<u64>()) as u64;
        assert_eq!(SummedAreaTable::footprint_bytes(3, 4), actual);
    }

    #[test]
    fn test_build_from_buffer() {
        let buf = PixelBuffer::from_vec(2, 2, PixelFormat::Gray8, vec![255; 4]).unwrap();
        let table = SummedAreaTable::build(&buf).unwrap();
        assert_eq!(table.rect_sum(0, 0, 2, 2), 1020);
    }

    #[test]
    fn test_local_mean_constant() {
        let src = PixelBuffer::from_vec(4, 5, PixelFormat::Gray8, vec![128; 20]).unwrap();
        let dst = PixelBuffer::new(4, 5, PixelFormat::Gray8).unwrap();
        local_mean(&src, &dst, 7).unwrap();
        assert!(dst.to_vec().unwrap().iter().all(|&v| v == 128));
    }
}
