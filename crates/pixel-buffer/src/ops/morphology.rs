// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Grayscale morphology with elliptical structuring elements.
//!
//! Pixels outside the image are ignored, so erosion never pulls in a dark
//! border and dilation never pulls in a bright one.

use super::ensure_gray_pair;
use crate::{BufferError, PixelBuffer};

/// A square mask centred on its middle element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    size: usize,
    mask: Vec<bool>,
}

impl StructuringElement {
    /// Ellipse inscribed in a `size × size` square.
    ///
    /// A 3×3 ellipse is a cross; 5×5 is a disc with clipped corners.
    pub fn ellipse(size: usize) -> Self {
        let size = size.max(1);
        let radius = (size / 2) as f64;
        let center = (size / 2) as isize;
        let mut mask = vec![false; size * size];
        for i in 0..size {
            let dy = i as f64 - radius;
            if dy.abs() > radius {
                continue;
            }
            let dx = if radius > 0.0 {
                (radius * ((radius * radius - dy * dy) / (radius * radius)).max(0.0).sqrt()).round()
                    as isize
            } else {
                0
            };
            let j1 = (center - dx).max(0) as usize;
            let j2 = ((center + dx + 1) as usize).min(size);
            for j in j1..j2 {
                mask[i * size + j] = true;
            }
        }
        Self { size, mask }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the mask covers `(row, col)` of the `size × size` square.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.size && col < self.size && self.mask[row * self.size + col]
    }

    fn offsets(&self) -> Vec<(isize, isize)> {
        let c = (self.size / 2) as isize;
        (0..self.size)
            .flat_map(|r| (0..self.size).map(move |col| (r, col)))
            .filter(|&(r, col)| self.mask[r * self.size + col])
            .map(|(r, col)| (r as isize - c, col as isize - c))
            .collect()
    }
}

#[derive(Clone, Copy)]
enum Extremum {
    Min,
    Max,
}

fn morph_slice(
    src: &[u8],
    dst: &mut [u8],
    rows: usize,
    cols: usize,
    offsets: &[(isize, isize)],
    extremum: Extremum,
) {
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = match extremum {
                Extremum::Min => u8::MAX,
                Extremum::Max => u8::MIN,
            };
            for &(dy, dx) in offsets {
                let (rr, cc) = (r as isize + dy, c as isize + dx);
                if rr < 0 || cc < 0 || rr >= rows as isize || cc >= cols as isize {
                    continue;
                }
                let v = src[rr as usize * cols + cc as usize];
                acc = match extremum {
                    Extremum::Min => acc.min(v),
                    Extremum::Max => acc.max(v),
                };
            }
            dst[r * cols + c] = acc;
        }
    }
}

fn apply(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    element: &StructuringElement,
    op: &'static str,
    passes: [Extremum; 2],
    single: bool,
) -> Result<(), BufferError> {
    ensure_gray_pair(src, dst, op)?;
    let (rows, cols) = (src.rows(), src.cols());
    let offsets = element.offsets();
    src.transform_into(dst, op, |s, d| {
        if single {
            morph_slice(s, d, rows, cols, &offsets, passes[0]);
            return;
        }
        let mut scratch = vec![0u8; s.len()];
        morph_slice(s, &mut scratch, rows, cols, &offsets, passes[0]);
        morph_slice(&scratch, d, rows, cols, &offsets, passes[1]);
    })
}

/// Minimum over the structuring element.
pub fn erode(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    element: &StructuringElement,
) -> Result<(), BufferError> {
    apply(src, dst, element, "erode", [Extremum::Min, Extremum::Min], true)
}

/// Maximum over the structuring element.
pub fn dilate(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    element: &StructuringElement,
) -> Result<(), BufferError> {
    apply(src, dst, element, "dilate", [Extremum::Max, Extremum::Max], true)
}

/// Erosion followed by dilation: removes bright specks smaller than the element.
pub fn open(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    element: &StructuringElement,
) -> Result<(), BufferError> {
    apply(src, dst, element, "open", [Extremum::Min, Extremum::Max], false)
}

/// Dilation followed by erosion: fills dark holes smaller than the element.
pub fn close(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    element: &StructuringElement,
) -> Result<(), BufferError> {
    apply(src, dst, element, "close", [Extremum::Max, Extremum::Min], false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;

    fn gray(rows: usize, cols: usize, data: Vec<u8>) -> PixelBuffer {
        PixelBuffer::from_vec(rows, cols, PixelFormat::Gray8, data).unwrap()
    }

    #[test]
    fn test_ellipse_3_is_cross() {
        let se = StructuringElement::ellipse(3);
        let expected = [
            false, true, false, //
            true, true, true, //
            false, true, false,
        ];
        for (i, &e) in expected.iter().enumerate() {
            assert_eq!(se.contains(i / 3, i % 3), e, "element {i}");
        }
    }

    #[test]
    fn test_ellipse_5_shape() {
        let se = StructuringElement::ellipse(5);
        assert!(!se.contains(0, 0));
        assert!(se.contains(0, 2));
        assert!(se.contains(1, 0));
        assert!(se.contains(2, 0));
        assert!(!se.contains(4, 4));
    }

    #[test]
    fn test_open_removes_isolated_pixel() {
        let mut data = vec![0u8; 49];
        data[24] = 255;
        let src = gray(7, 7, data);
        let dst = PixelBuffer::new(7, 7, PixelFormat::Gray8).unwrap();
        open(&src, &dst, &StructuringElement::ellipse(3)).unwrap();
        assert!(dst.to_vec().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_close_fills_isolated_hole() {
        let mut data = vec![255u8; 49];
        data[24] = 0;
        let src = gray(7, 7, data);
        let dst = PixelBuffer::new(7, 7, PixelFormat::Gray8).unwrap();
        close(&src, &dst, &StructuringElement::ellipse(3)).unwrap();
        assert!(dst.to_vec().unwrap().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_border_is_not_eroded() {
        let src = gray(3, 3, vec![255; 9]);
        let dst = PixelBuffer::new(3, 3, PixelFormat::Gray8).unwrap();
        erode(&src, &dst, &StructuringElement::ellipse(3)).unwrap();
        assert!(dst.to_vec().unwrap().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_dilate_grows_cross() {
        let mut data = vec![0u8; 25];
        data[12] = 200;
        let src = gray(5, 5, data);
        let dst = PixelBuffer::new(5, 5, PixelFormat::Gray8).unwrap();
        dilate(&src, &dst, &StructuringElement::ellipse(3)).unwrap();
        let out = dst.to_vec().unwrap();
        assert_eq!(out[7], 200);
        assert_eq!(out[11], 200);
        assert_eq!(out[6], 0); // diagonal not in the cross
    }
}
