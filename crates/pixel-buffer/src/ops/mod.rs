// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Image kernels over [`PixelBuffer`](crate::PixelBuffer)s.
//!
//! Each public kernel reads a source buffer and writes a caller-supplied
//! destination of the same size, so the caller decides where (and under
//! which budget) output storage comes from. Source and destination must be
//! distinct buffers. Filters and morphology operate on `Gray8` only.
//!
//! Some kernels also need image-sized working memory of their own;
//! [`Kernel::working_bytes`] reports how much, so callers can hold it
//! against the same budget.

pub mod clahe;
pub mod color;
pub mod filter;
pub mod integral;
pub mod morphology;

pub use clahe::{equalize_adaptive, ClaheParams};
pub use color::{composite_over_white, luma, to_grayscale};
pub use filter::{
    blend, box_mean, gaussian_blur, gaussian_kernel, median_blur, non_local_means, NlMeansParams,
};
pub use integral::{local_mean, SummedAreaTable};
pub use morphology::{close, dilate, erode, open, StructuringElement};

use crate::{BufferError, PixelBuffer, PixelFormat};
use std::fmt;

/// The kernels in this module, for working-memory accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    GaussianBlur,
    MedianBlur,
    BoxMean,
    LocalMean,
    Blend,
    NonLocalMeans,
    Erode,
    Dilate,
    Open,
    Close,
    Clahe,
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GaussianBlur => "gaussian_blur",
            Self::MedianBlur => "median_blur",
            Self::BoxMean => "box_mean",
            Self::LocalMean => "local_mean",
            Self::Blend => "blend",
            Self::NonLocalMeans => "non_local_means",
            Self::Erode => "erode",
            Self::Dilate => "dilate",
            Self::Open => "open",
            Self::Close => "close",
            Self::Clahe => "equalize_adaptive",
        }
    }

    /// Heap bytes the kernel allocates for a `rows × cols` image, beyond its
    /// source and destination.
    ///
    /// Per-call tables whose size does not depend on the image (a median
    /// window, CLAHE tile LUTs) are not counted.
    pub fn working_bytes(&self, rows: usize, cols: usize) -> u64 {
        let pixels = rows as u64 * cols as u64;
        match self {
            Self::GaussianBlur => pixels * std::mem::size_of::<f32>() as u64,
            Self::BoxMean | Self::LocalMean => SummedAreaTable::footprint_bytes(rows, cols),
            Self::Blend | Self::Open | Self::Close => pixels,
            Self::MedianBlur
            | Self::NonLocalMeans
            | Self::Erode
            | Self::Dilate
            | Self::Clahe => 0,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Checks that `src` and `dst` are both single-channel and equally sized.
pub(crate) fn ensure_gray_pair(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    op: &'static str,
) -> Result<(), BufferError> {
    src.ensure_format(PixelFormat::Gray8, op)?;
    dst.ensure_format(PixelFormat::Gray8, op)?;
    src.ensure_same_size(dst, op)
}

/// Mirror index without repeating the edge sample (`gfedcb|abcdefgh|gfedcba`).
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    i as usize
}

/// Clamp index to the nearest edge sample (`aaa|abcdefgh|hhh`).
pub(crate) fn replicate(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(3, 5), 3);
        assert_eq!(reflect101(-7, 1), 0);
        // Radius wider than the row still lands in range.
        assert!(reflect101(-9, 3) < 3);
    }

    #[test]
    fn test_working_bytes() {
        assert_eq!(Kernel::GaussianBlur.working_bytes(10, 20), 800);
        assert_eq!(Kernel::LocalMean.working_bytes(10, 20), 11 * 21 * 8);
        assert_eq!(Kernel::BoxMean.working_bytes(10, 20), 11 * 21 * 8);
        assert_eq!(Kernel::Open.working_bytes(10, 20), 200);
        assert_eq!(Kernel::Blend.working_bytes(10, 20), 200);
        assert_eq!(Kernel::Erode.working_bytes(10, 20), 0);
        assert_eq!(Kernel::MedianBlur.working_bytes(10, 20), 0);
        assert_eq!(Kernel::Clahe.to_string(), "equalize_adaptive");
    }

    #[test]
    fn test_replicate() {
        assert_eq!(replicate(-3, 4), 0);
        assert_eq!(replicate(9, 4), 3);
        assert_eq!(replicate(2, 4), 2);
    }
}
