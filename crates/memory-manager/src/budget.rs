// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The global byte ceiling for pixel buffer allocation.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Suffixes accepted by [`MemoryBudget::parse`], longest first.
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// A hard ceiling on the bytes of live pixel buffers.
///
/// Defaults to 2 GiB.
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// assert_eq!(MemoryBudget::default().as_mb(), 2048);
/// assert_eq!(MemoryBudget::parse("512M").unwrap().as_mb(), 512);
/// assert_eq!(MemoryBudget::parse("1gb").unwrap().to_string(), "1 GB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GIB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Budget in whole mebibytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses `"2G"`, `"512MB"`, `"64k"`, `"100B"`, or a bare byte count.
    ///
    /// Suffixes are binary multiples and case-insensitive; surrounding
    /// whitespace is ignored. Zero is rejected.
    pub fn parse(input: &str) -> Result<Self, MemoryError> {
        let invalid = |reason: &str| MemoryError::InvalidBudget {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty string"));
        }

        let upper = trimmed.to_ascii_uppercase();
        let (digits, multiplier) = SUFFIXES
            .iter()
            .find(|(suffix, _)| upper.ends_with(suffix))
            .map(|(suffix, mult)| (&trimmed[..trimmed.len() - suffix.len()], *mult))
            .unwrap_or((trimmed, 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| invalid("expected a number with an optional K/M/G suffix"))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("value overflows"))?;
        if bytes == 0 {
            return Err(invalid("budget must be greater than zero"));
        }
        Ok(Self { bytes })
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::from_gb(2)
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, size) in [("GB", GIB), ("MB", MIB), ("KB", KIB)] {
            if self.bytes >= size && self.bytes % size == 0 {
                return write!(f, "{} {unit}", self.bytes / size);
            }
        }
        write!(f, "{} B", self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_two_gib() {
        assert_eq!(MemoryBudget::default().as_bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("2G").unwrap().as_mb(), 2048);
        assert_eq!(MemoryBudget::parse("1024K").unwrap().as_bytes(), 1024 * 1024);
        assert_eq!(MemoryBudget::parse("100B").unwrap().as_bytes(), 100);
        assert_eq!(MemoryBudget::parse("  4096 ").unwrap().as_bytes(), 4096);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "abc", "0M", "12X", "-5M"] {
            assert!(
                matches!(MemoryBudget::parse(bad), Err(MemoryError::InvalidBudget { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_gb(2).to_string(), "2 GB");
        assert_eq!(MemoryBudget::from_mb(768).to_string(), "768 MB");
        assert_eq!(MemoryBudget::from_bytes(3072).to_string(), "3 KB");
        assert_eq!(MemoryBudget::from_bytes(1000).to_string(), "1000 B");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_mb(256);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
