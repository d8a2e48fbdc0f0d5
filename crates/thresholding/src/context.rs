// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Cancellation-bearing processing context and pipeline stage names.

use crate::{AlgorithmError, CancelReason};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A named step of an algorithm's pipeline, used for checkpoints and
/// error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Stage {
    Validate,
    Grayscale,
    EdgePreservation,
    GaussianBlur,
    ContrastEnhancement,
    NeighborhoodMean,
    BuildHistogram,
    ThresholdSearch,
    Classify,
    NoiseReduction,
    Preprocess,
    Iteration,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Grayscale => "grayscale",
            Self::EdgePreservation => "edge-preservation",
            Self::GaussianBlur => "gaussian-blur",
            Self::ContrastEnhancement => "contrast-enhancement",
            Self::NeighborhoodMean => "neighborhood-mean",
            Self::BuildHistogram => "build-histogram",
            Self::ThresholdSearch => "threshold-search",
            Self::Classify => "classify",
            Self::NoiseReduction => "noise-reduction",
            Self::Preprocess => "preprocess",
            Self::Iteration => "iteration",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type StageObserver = Arc<dyn Fn(Stage) + Send + Sync>;

/// What an algorithm polls between stages.
///
/// # Example
/// ```
/// use thresholding::{ProcessingContext, Stage};
///
/// let ctx = ProcessingContext::new();
/// assert!(ctx.checkpoint(Stage::Grayscale).is_ok());
/// ctx.cancel();
/// assert!(ctx.checkpoint(Stage::Classify).unwrap_err().is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct ProcessingContext {
    token: CancelToken,
    deadline: Option<Instant>,
    observer: Option<StageObserver>,
}

impl ProcessingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an existing token, so cancellation can come from elsewhere.
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Fails checkpoints once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Calls `observer` at every checkpoint, before the cancellation check.
    pub fn with_observer(mut self, observer: impl Fn(Stage) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `Err(Cancelled)` if the token is set or the deadline passed.
    pub fn checkpoint(&self, stage: Stage) -> Result<(), AlgorithmError> {
        if let Some(observer) = &self.observer {
            observer(stage);
        }
        if self.token.is_cancelled() {
            tracing::debug!(component = "context", stage = %stage, "processing cancelled");
            return Err(AlgorithmError::Cancelled {
                stage,
                reason: CancelReason::Requested,
            });
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::debug!(
                component = "context",
                stage = %stage,
                "processing deadline exceeded"
            );
            return Err(AlgorithmError::Cancelled {
                stage,
                reason: CancelReason::DeadlineExceeded,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
