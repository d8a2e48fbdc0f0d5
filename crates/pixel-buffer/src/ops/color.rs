// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Colour-space conversions.

use crate::{BufferError, PixelBuffer, PixelFormat};

/// Rec. 601 luma in 14-bit fixed point: `0.299 R + 0.587 G + 0.114 B`.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    ((r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14) as u8
}

/// Converts any supported format into single-channel intensity.
///
/// `Gray8` sources are copied unchanged; RGBA ignores alpha. `dst` must be
/// a `Gray8` buffer of the same size.
pub fn to_grayscale(src: &PixelBuffer, dst: &PixelBuffer) -> Result<(), BufferError> {
    dst.ensure_format(PixelFormat::Gray8, "to_grayscale")?;
    let channels = src.channels();
    src.transform_into(dst, "to_grayscale", |s, d| {
        if channels == 1 {
            d.copy_from_slice(s);
            return;
        }
        for (px, out) in s.chunks_exact(channels).zip(d.iter_mut()) {
            *out = luma(px[0], px[1], px[2]);
        }
    })
}

/// Flattens an `Rgba8` buffer onto an opaque white background into `Rgb8`.
pub fn composite_over_white(src: &PixelBuffer, dst: &PixelBuffer) -> Result<(), BufferError> {
    src.ensure_format(PixelFormat::Rgba8, "composite_over_white")?;
    dst.ensure_format(PixelFormat::Rgb8, "composite_over_white")?;
    src.transform_into(dst, "composite_over_white", |s, d| {
        for (px, out) in s.chunks_exact(4).zip(d.chunks_exact_mut(3)) {
            let alpha = px[3] as u32;
            for c in 0..3 {
                out[c] = ((px[c] as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_extremes() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_gray_source_is_copied() {
        let src = PixelBuffer::from_vec(2, 2, PixelFormat::Gray8, vec![1, 2, 3, 4]).unwrap();
        let dst = PixelBuffer::new(2, 2, PixelFormat::Gray8).unwrap();
        to_grayscale(&src, &dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rgb_to_gray() {
        let src =
            PixelBuffer::from_vec(1, 2, PixelFormat::Rgb8, vec![200, 200, 200, 0, 255, 0]).unwrap();
        let dst = PixelBuffer::new(1, 2, PixelFormat::Gray8).unwrap();
        to_grayscale(&src, &dst).unwrap();
        assert_eq!(dst.to_vec().unwrap(), vec![200, 150]);
    }

    #[test]
    fn test_rgba_to_gray_ignores_alpha() {
        let src = PixelBuffer::from_vec(1, 1, PixelFormat::Rgba8, vec![90, 90, 90, 0]).unwrap();
        let dst = PixelBuffer::new(1, 1, PixelFormat::Gray8).unwrap();
        to_grayscale(&src, &dst).unwrap();
        assert_eq!(dst.get(0, 0).unwrap(), 90);
    }

    #[test]
    fn test_gray_requires_gray_destination() {
        let src = PixelBuffer::new(1, 1, PixelFormat::Gray8).unwrap();
        let dst = PixelBuffer::new(1, 1, PixelFormat::Rgb8).unwrap();
        assert!(to_grayscale(&src, &dst).is_err());
    }

    #[test]
    fn test_composite_over_white() {
        let src = PixelBuffer::from_vec(
            1,
            3,
            PixelFormat::Rgba8,
            vec![0, 0, 0, 0, 0, 0, 0, 255, 100, 100, 100, 128],
        )
        .unwrap();
        let dst = PixelBuffer::new(1, 3, PixelFormat::Rgb8).unwrap();
        composite_over_white(&src, &dst).unwrap();
        let out = dst.to_vec().unwrap();
        // Fully transparent → white, opaque → unchanged.
        assert_eq!(&out[0..3], &[255, 255, 255]);
        assert_eq!(&out[3..6], &[0, 0, 0]);
        // Half alpha lands between the colour and white.
        assert!(out[6] > 100 && out[6] < 255);
    }
}
