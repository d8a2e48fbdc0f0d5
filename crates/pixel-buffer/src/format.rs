// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pixel layouts supported by [`PixelBuffer`](crate::PixelBuffer).

use std::fmt;

/// Channel layout of an 8-bit pixel buffer.
///
/// All formats use one `u8` per channel, interleaved in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// Single-channel intensity.
    Gray8,
    /// Three interleaved channels in R, G, B order.
    Rgb8,
    /// Four interleaved channels in R, G, B, A order.
    Rgba8,
}

impl PixelFormat {
    /// Returns the number of channels per pixel.
    pub fn channels(&self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    /// Returns the size of one pixel in bytes.
    pub fn bytes_per_pixel(&self) -> usize {
        // 8-bit samples: one byte per channel.
        self.channels()
    }

    /// Maps a channel count back to a format.
    pub fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            1 => Some(Self::Gray8),
            3 => Some(Self::Rgb8),
            4 => Some(Self::Rgba8),
            _ => None,
        }
    }

    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gray8 => "gray8",
            Self::Rgb8 => "rgb8",
            Self::Rgba8 => "rgba8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(PixelFormat::Gray8.channels(), 1);
        assert_eq!(PixelFormat::Rgb8.channels(), 3);
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_from_channels() {
        assert_eq!(PixelFormat::from_channels(1), Some(PixelFormat::Gray8));
        assert_eq!(PixelFormat::from_channels(4), Some(PixelFormat::Rgba8));
        assert_eq!(PixelFormat::from_channels(2), None);
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&PixelFormat::Rgb8).unwrap();
        let back: PixelFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PixelFormat::Rgb8);
    }
}
