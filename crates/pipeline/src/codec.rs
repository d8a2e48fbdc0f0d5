// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Image decoding and encoding.
//!
//! [`Decoder`] and [`Encoder`] are the seams the [`Coordinator`](crate::Coordinator)
//! talks to; [`ImageCodec`] implements both on top of the `image` crate.
//!
//! 8-bit sources decode straight into a manager-issued buffer and buffers
//! encode straight from their locked samples. Conversions that need a
//! staging copy reserve it with the [`MemoryManager`] first.

use crate::PipelineError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{
    ColorType, DynamicImage, ExtendedColorType, GrayImage, ImageBuffer, ImageDecoder, ImageEncoder,
    ImageError, ImageReader,
};
use memory_manager::MemoryManager;
use pixel_buffer::{ops, PixelBuffer, PixelFormat};
use std::fmt;
use std::io::Cursor;
use std::path::Path;

/// JPEG quality used for every JPEG written.
pub const JPEG_QUALITY: u8 = 95;

/// Turns encoded bytes into an 8-bit buffer registered with `memory`.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8], memory: &MemoryManager) -> Result<PixelBuffer, PipelineError>;
}

/// Serialises a buffer in the requested format. Any intermediate buffer
/// comes from `memory`.
pub trait Encoder: Send + Sync {
    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        memory: &MemoryManager,
    ) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// `png`, `jpeg` or `jpg`, ignoring case. Anything else logs a warning
    /// and yields PNG.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Self::Png,
            "jpeg" | "jpg" => Self::Jpeg,
            other => {
                tracing::warn!(
                    component = "codec",
                    format = other,
                    "unsupported output format, falling back to png"
                );
                Self::Png
            }
        }
    }

    /// Format implied by the file extension; PNG when there is none.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(Self::Png, Self::from_name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoder and encoder backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageCodec {
    /// Composite RGBA sources over white into `Rgb8`.
    pub composite_alpha: bool,
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self {
            composite_alpha: true,
        }
    }
}

impl ImageCodec {
    pub fn new(composite_alpha: bool) -> Self {
        Self { composite_alpha }
    }
}

impl Decoder for ImageCodec {
    /// Gray and gray-alpha sources become `Gray8`, RGB becomes `Rgb8`, and
    /// RGBA becomes `Rgba8` (or `Rgb8` when compositing). Samples wider than
    /// 8 bits are scaled down.
    fn decode(&self, bytes: &[u8], memory: &MemoryManager) -> Result<PixelBuffer, PipelineError> {
        let decoder = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PipelineError::Decode(e.to_string()))?
            .into_decoder()
            .map_err(decode_error)?;
        let (w, h) = decoder.dimensions();
        let (cols, rows) = (w as usize, h as usize);
        let color = decoder.color_type();
        let format = match color.channel_count() {
            1 | 2 => PixelFormat::Gray8,
            3 => PixelFormat::Rgb8,
            _ => PixelFormat::Rgba8,
        };

        let decoded = memory.allocate(rows, cols, format, "decoder.input")?;
        let direct = matches!(
            (color, format),
            (ColorType::L8, PixelFormat::Gray8)
                | (ColorType::Rgb8, PixelFormat::Rgb8)
                | (ColorType::Rgba8, PixelFormat::Rgba8)
        );
        if direct {
            decoded
                .with_data_mut("decode", |dst| decoder.read_image(dst))?
                .map_err(decode_error)?;
        } else {
            // Raw samples plus the converted copy.
            let staging = decoder.total_bytes() + decoded.size_bytes() as u64;
            let _staging = memory.reserve(staging, "decoder.staging")?;
            let image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
            let samples = match format {
                PixelFormat::Gray8 => image.into_luma8().into_raw(),
                PixelFormat::Rgb8 => image.into_rgb8().into_raw(),
                PixelFormat::Rgba8 => image.into_rgba8().into_raw(),
            };
            decoded.with_data_mut("decode", |dst| dst.copy_from_slice(&samples))?;
        }
        tracing::debug!(
            component = "codec",
            rows,
            cols,
            source = ?color,
            format = %format,
            direct,
            "decoded image"
        );

        if format == PixelFormat::Rgba8 && self.composite_alpha {
            let flattened = memory.allocate(rows, cols, PixelFormat::Rgb8, "decoder.composited")?;
            ops::composite_over_white(&decoded, &flattened)?;
            return Ok(flattened);
        }
        Ok(decoded)
    }
}

impl Encoder for ImageCodec {
    /// JPEG has no alpha channel, so `Rgba8` is composited over white into a
    /// tracked `Rgb8` buffer before encoding.
    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        memory: &MemoryManager,
    ) -> Result<Vec<u8>, PipelineError> {
        let flattened;
        let source = if format == OutputFormat::Jpeg && buffer.format() == PixelFormat::Rgba8 {
            flattened = memory.allocate(
                buffer.rows(),
                buffer.cols(),
                PixelFormat::Rgb8,
                "encoder.flattened",
            )?;
            ops::composite_over_white(buffer, &flattened)?;
            &flattened
        } else {
            buffer
        };

        let (w, h) = (source.cols() as u32, source.rows() as u32);
        let color = match source.format() {
            PixelFormat::Gray8 => ExtendedColorType::L8,
            PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
            PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
        };
        let mut out = Vec::new();
        source
            .with_data("encode", |data| match format {
                OutputFormat::Png => PngEncoder::new(&mut out).write_image(data, w, h, color),
                OutputFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
                    .write_image(data, w, h, color),
            })?
            .map_err(|e| PipelineError::Encode {
                format: format.as_str(),
                detail: e.to_string(),
            })?;
        Ok(out)
    }
}

fn decode_error(e: ImageError) -> PipelineError {
    PipelineError::Decode(e.to_string())
}

/// A single-channel display copy of a buffer: channel 0 for gray input,
/// luma otherwise.
///
/// The returned image is owned and outlives the buffer's release; the luma
/// intermediate for color input comes from `memory`.
pub fn to_gray_image(buffer: &PixelBuffer, memory: &MemoryManager) -> Result<GrayImage, PipelineError> {
    let (w, h) = (buffer.cols() as u32, buffer.rows() as u32);
    let data = if buffer.format() == PixelFormat::Gray8 {
        buffer.to_vec()?
    } else {
        let gray = memory.allocate(buffer.rows(), buffer.cols(), PixelFormat::Gray8, "display.luma")?;
        ops::to_grayscale(buffer, &gray)?;
        gray.to_vec()?
    };
    ImageBuffer::from_raw(w, h, data).ok_or_else(|| PipelineError::Encode {
        format: "raw",
        detail: format!("sample count does not match {w}x{h}"),
    })
}
