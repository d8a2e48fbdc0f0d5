// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The binarization algorithms and the capability they share.

mod otsu2d;
mod triclass;

pub use otsu2d::{Otsu2D, Otsu2DParams, Otsu2DReport, OTSU2D_SCHEMA};
pub use triclass::{
    ConvergenceHistory, InitialThresholdMethod, IterationRecord, IterativeTriclass, StopReason,
    TriclassParams, TriclassReport, TRICLASS_SCHEMA,
};

use crate::error::AtStage;
use crate::{AlgorithmError, ParameterSchema, ParameterSet, ProcessingContext, Stage, ValidationError};
use memory_manager::{MemoryManager, Reservation};
use pixel_buffer::ops::Kernel;
use pixel_buffer::{PixelBuffer, PixelFormat};
use std::fmt;
use std::str::FromStr;

/// Converts an image buffer into a binary (0/255) `Gray8` buffer.
///
/// Implementations validate `params` before touching any pixels, allocate
/// every intermediate through `memory`, and poll `ctx` between stages.
/// On error every buffer they allocated has been released.
pub trait Thresholder: Send + Sync {
    /// Display name, e.g. `"2D Otsu"`.
    fn name(&self) -> &'static str;

    fn schema(&self) -> &'static ParameterSchema;

    fn process(
        &self,
        input: &PixelBuffer,
        params: &ParameterSet,
        ctx: &ProcessingContext,
        memory: &MemoryManager,
    ) -> Result<ThresholdOutput, AlgorithmError>;

    /// Checks `params` without processing anything.
    fn validate(&self, params: &ParameterSet) -> Result<(), ValidationError> {
        self.schema().validate(params).map(|_| ())
    }

    fn default_parameters(&self) -> ParameterSet {
        self.schema().defaults()
    }
}

/// A binary result plus what the algorithm decided along the way.
///
/// `image` is registered with the [`MemoryManager`] that produced it;
/// release it there or let it drop.
#[derive(Debug)]
pub struct ThresholdOutput {
    pub image: PixelBuffer,
    pub report: AlgorithmReport,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "algorithm")]
pub enum AlgorithmReport {
    #[serde(rename = "otsu2d")]
    Otsu2D(Otsu2DReport),
    #[serde(rename = "triclass")]
    Triclass(TriclassReport),
}

impl AlgorithmReport {
    /// Output pixels set to 255.
    pub fn foreground_pixels(&self) -> usize {
        match self {
            Self::Otsu2D(r) => r.foreground_pixels,
            Self::Triclass(r) => r.foreground_pixels,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Otsu2D(r) => format!(
                "bins={} t1={:.1} t2={:.1} variance={:.6}",
                r.bins, r.intensity_threshold, r.neighborhood_threshold, r.variance
            ),
            Self::Triclass(r) => format!(
                "iterations={} stop={} final_threshold={}",
                r.iterations(),
                r.stop_reason,
                r.thresholds
                    .last()
                    .map_or_else(|| "-".to_string(), |t| format!("{t:.2}"))
            ),
        }
    }
}

// ── Closed algorithm set ─────────────────────────────────────────

/// Every algorithm this crate provides.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    Otsu2D,
    IterativeTriclass,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Otsu2D, Algorithm::IterativeTriclass];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Otsu2D => Otsu2D.name(),
            Self::IterativeTriclass => IterativeTriclass.name(),
        }
    }

    /// Accepts the display name or an alias, ignoring case.
    pub fn parse(id: &str) -> Result<Self, AlgorithmError> {
        let key = id.trim().to_ascii_lowercase();
        match key.as_str() {
            "2d otsu" | "otsu2d" | "otsu" | "2d-otsu" => Ok(Self::Otsu2D),
            "iterative triclass" | "iterative-triclass" | "triclass" => {
                Ok(Self::IterativeTriclass)
            }
            _ => Err(AlgorithmError::UnknownAlgorithm(id.to_string())),
        }
    }

    fn implementation(&self) -> &'static dyn Thresholder {
        match self {
            Self::Otsu2D => &Otsu2D,
            Self::IterativeTriclass => &IterativeTriclass,
        }
    }
}

impl Thresholder for Algorithm {
    fn name(&self) -> &'static str {
        Algorithm::name(self)
    }

    fn schema(&self) -> &'static ParameterSchema {
        self.implementation().schema()
    }

    fn process(
        &self,
        input: &PixelBuffer,
        params: &ParameterSet,
        ctx: &ProcessingContext,
        memory: &MemoryManager,
    ) -> Result<ThresholdOutput, AlgorithmError> {
        self.implementation().process(input, params, ctx, memory)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Algorithm {
    type Error = AlgorithmError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Algorithm> for String {
    fn from(a: Algorithm) -> Self {
        a.name().to_string()
    }
}

// ── Shared helpers ───────────────────────────────────────────────

/// Allocates same-sized `Gray8` intermediates through the manager, tagged
/// `<prefix>.<name>`.
pub(crate) struct Scratch<'a> {
    memory: &'a MemoryManager,
    rows: usize,
    cols: usize,
    prefix: &'static str,
}

impl<'a> Scratch<'a> {
    pub(crate) fn new(memory: &'a MemoryManager, like: &PixelBuffer, prefix: &'static str) -> Self {
        Self {
            memory,
            rows: like.rows(),
            cols: like.cols(),
            prefix,
        }
    }

    pub(crate) fn gray(&self, stage: Stage, name: &str) -> Result<PixelBuffer, AlgorithmError> {
        self.memory
            .allocate(self.rows, self.cols, PixelFormat::Gray8, &format!("{}.{name}", self.prefix))
            .at(stage)
    }

    /// Holds the working set `kernel` needs beyond its input and output.
    pub(crate) fn working(&self, stage: Stage, kernel: Kernel) -> Result<Reservation, AlgorithmError> {
        let bytes = kernel.working_bytes(self.rows, self.cols);
        self.reserve(stage, bytes, kernel.name())
    }

    pub(crate) fn reserve(
        &self,
        stage: Stage,
        bytes: u64,
        name: &str,
    ) -> Result<Reservation, AlgorithmError> {
        self.memory
            .reserve(bytes, &format!("{}.{name}", self.prefix))
            .at(stage)
    }

    pub(crate) fn num_pixels(&self) -> usize {
        self.rows * self.cols
    }
}

/// Grayscale copy of `input`, allocated through `scratch`.
pub(crate) fn grayscale(
    input: &PixelBuffer,
    scratch: &Scratch<'_>,
    ctx: &ProcessingContext,
) -> Result<PixelBuffer, AlgorithmError> {
    ctx.checkpoint(Stage::Grayscale)?;
    let gray = scratch.gray(Stage::Grayscale, "gray")?;
    pixel_buffer::ops::to_grayscale(input, &gray).at(Stage::Grayscale)?;
    Ok(gray)
}

/// Inclusive min/max of a sample slice; `(0, 0)` when empty.
pub(crate) fn intensity_range<'s>(samples: impl IntoIterator<Item = &'s u8>) -> (u8, u8) {
    let mut it = samples.into_iter();
    let Some(&first) = it.next() else {
        return (0, 0);
    };
    it.fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}
