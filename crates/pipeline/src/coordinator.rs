// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The processing coordinator.
//!
//! ```text
//! load_image / load_path ──► input ──► process() ──► result ──► save / save_path
//!                                          │
//!                                spawn_blocking(algorithm)
//!                                   + optional timeout
//! ```
//!
//! The coordinator owns the input and the latest result. Loading a new
//! image releases both; processing again releases the previous result.

use crate::codec::{self, Decoder, Encoder, ImageCodec};
use crate::metrics::{Dimensions, ProcessingMetrics, StageTiming};
use crate::{OutputFormat, PipelineConfig, PipelineError};
use memory_manager::MemoryManager;
use parking_lot::Mutex;
use pixel_buffer::PixelBuffer;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thresholding::{
    Algorithm, AlgorithmError, AlgorithmRegistry, AlgorithmReport, CancelReason, CancelToken,
    ProcessingContext, Stage, Thresholder,
};

// ── Processed output ───────────────────────────────────────────

/// The result of one [`Coordinator::process`] call.
///
/// Clones share the same buffer. It stays valid until the coordinator
/// replaces it (next `process`, `load_*`, or `shutdown`).
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub algorithm: Algorithm,
    pub buffer: Arc<PixelBuffer>,
    /// Owned single-channel copy for display; unaffected by release.
    pub display: Arc<image::GrayImage>,
    pub metrics: ProcessingMetrics,
    pub report: AlgorithmReport,
}

// ── Stage clock ────────────────────────────────────────────────

/// Turns checkpoint notifications into per-stage durations.
#[derive(Default)]
struct StageClock {
    inner: Mutex<ClockState>,
}

#[derive(Default)]
struct ClockState {
    current: Option<(Stage, Instant)>,
    timings: Vec<StageTiming>,
}

impl StageClock {
    fn mark(&self, stage: Stage) {
        let now = Instant::now();
        let mut state = self.inner.lock();
        if let Some((previous, since)) = state.current.replace((stage, now)) {
            state.timings.push(StageTiming {
                stage: previous,
                elapsed: now - since,
            });
        }
    }

    fn finish(&self) -> Vec<StageTiming> {
        let mut state = self.inner.lock();
        if let Some((last, since)) = state.current.take() {
            state.timings.push(StageTiming {
                stage: last,
                elapsed: since.elapsed(),
            });
        }
        std::mem::take(&mut state.timings)
    }
}

// ── Coordinator ────────────────────────────────────────────────

#[derive(Default)]
struct State {
    input: Option<Arc<PixelBuffer>>,
    result: Option<ProcessedImage>,
    running: Option<CancelToken>,
}

/// Loads, processes, and saves images under one memory budget.
///
/// # Example
/// ```no_run
/// use pipeline::{Coordinator, OutputFormat, PipelineConfig};
///
/// # async fn example() -> Result<(), pipeline::PipelineError> {
/// let coordinator = Coordinator::new(PipelineConfig::default())?;
/// coordinator.load_path("scan.png".as_ref())?;
/// let result = coordinator.process().await?;
/// println!("{}", result.metrics.summary());
/// let png = coordinator.save(OutputFormat::Png)?;
/// # let _ = png;
/// coordinator.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    config: PipelineConfig,
    memory: MemoryManager,
    registry: Arc<AlgorithmRegistry>,
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn Encoder>,
    state: Mutex<State>,
    /// Serialises `process` calls.
    process_lock: tokio::sync::Mutex<()>,
}

impl Coordinator {
    /// Creates a coordinator using the `image`-crate codec.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let codec = ImageCodec::new(config.composite_alpha);
        Self::with_codecs(config, Box::new(codec), Box::new(codec))
    }

    /// Creates a coordinator with custom decoder and encoder.
    ///
    /// Starts the memory monitor when called inside a tokio runtime.
    pub fn with_codecs(
        config: PipelineConfig,
        decoder: Box<dyn Decoder>,
        encoder: Box<dyn Encoder>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let budget = config.parse_budget()?;
        let memory = MemoryManager::new(budget);
        let registry = Arc::new(AlgorithmRegistry::new());
        config.apply_to(&registry)?;

        if tokio::runtime::Handle::try_current().is_ok() {
            memory.start_monitor(config.monitor.clone())?;
        } else {
            tracing::debug!(
                component = "coordinator",
                "no tokio runtime, memory monitor not started"
            );
        }

        tracing::info!(
            component = "coordinator",
            budget = %budget,
            algorithm = %registry.current(),
            "coordinator created"
        );

        Ok(Self {
            config,
            memory,
            registry,
            decoder,
            encoder,
            state: Mutex::new(State::default()),
            process_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<AlgorithmRegistry> {
        &self.registry
    }

    // ── Loading ────────────────────────────────────────────────

    /// Decodes `bytes` and makes it the current input.
    ///
    /// The previous input and result are released only once decoding has
    /// succeeded.
    pub fn load_image(&self, bytes: &[u8]) -> Result<Arc<PixelBuffer>, PipelineError> {
        let start = Instant::now();
        let decoded = Arc::new(self.decoder.decode(bytes, &self.memory)?);

        let (old_input, old_result) = {
            let mut state = self.state.lock();
            (state.input.replace(decoded.clone()), state.result.take())
        };
        release_input(old_input);
        release_result(old_result);

        tracing::info!(
            component = "coordinator",
            rows = decoded.rows(),
            cols = decoded.cols(),
            channels = decoded.channels(),
            format = %decoded.format(),
            load_ms = start.elapsed().as_secs_f64() * 1000.0,
            "image loaded"
        );
        Ok(decoded)
    }

    /// Reads and decodes an image file.
    pub fn load_path(&self, path: &Path) -> Result<Arc<PixelBuffer>, PipelineError> {
        let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_image(&bytes)
    }

    pub fn input(&self) -> Option<Arc<PixelBuffer>> {
        self.state.lock().input.clone()
    }

    pub fn result(&self) -> Option<ProcessedImage> {
        self.state.lock().result.clone()
    }

    // ── Processing ─────────────────────────────────────────────

    /// Runs the registry's current algorithm on the current input.
    pub async fn process(&self) -> Result<ProcessedImage, PipelineError> {
        self.process_with(self.registry.current()).await
    }

    /// Runs `algorithm` with its stored parameters on the current input.
    ///
    /// The algorithm runs on the blocking pool. With a configured timeout,
    /// expiry cancels the run at its next stage boundary and the call
    /// fails with `Cancelled { reason: DeadlineExceeded }`.
    pub async fn process_with(&self, algorithm: Algorithm) -> Result<ProcessedImage, PipelineError> {
        let _running = self.process_lock.lock().await;
        let input = self.input().ok_or(PipelineError::NoImageLoaded)?;
        let params = self.registry.parameters(algorithm);
        let limit = self.config.timeout()?;

        let token = CancelToken::new();
        let clock = Arc::new(StageClock::default());
        let mut ctx = ProcessingContext::new().with_token(token.clone()).with_observer({
            let clock = clock.clone();
            move |stage| clock.mark(stage)
        });
        if let Some(limit) = limit {
            ctx = ctx.with_timeout(limit);
        }
        self.state.lock().running = Some(token.clone());

        tracing::debug!(
            component = "coordinator",
            algorithm = %algorithm,
            params = ?params,
            timeout_ms = limit.map(|l| l.as_millis() as u64),
            "processing started"
        );

        let start = Instant::now();
        let memory = self.memory.clone();
        let task_input = input.clone();
        let mut handle = tokio::task::spawn_blocking(move || {
            algorithm.process(&task_input, &params, &ctx, &memory)
        });

        let joined = match limit {
            None => (&mut handle).await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        component = "coordinator",
                        algorithm = %algorithm,
                        timeout_ms = limit.as_millis() as u64,
                        "processing timed out, cancelling"
                    );
                    token.cancel();
                    (&mut handle).await.map(|r| r.map_err(as_deadline))
                }
            },
        };
        self.state.lock().running = None;

        let output = joined
            .map_err(|e| PipelineError::Task(e.to_string()))?
            .map_err(|e| {
                tracing::error!(
                    component = "coordinator",
                    algorithm = %algorithm,
                    error = %e,
                    "processing failed"
                );
                PipelineError::Algorithm(e)
            })?;

        let display = codec::to_gray_image(&output.image, &self.memory)?;
        let mut metrics = ProcessingMetrics::new(algorithm, Dimensions::of(&input));
        for timing in clock.finish() {
            metrics.record_stage(timing.stage, timing.elapsed);
        }
        metrics.finalise(
            start.elapsed(),
            Dimensions::of(&output.image),
            output.report.foreground_pixels(),
            self.memory.stats().peak_used_bytes,
            self.memory.used_bytes(),
        );

        let processed = ProcessedImage {
            algorithm,
            buffer: Arc::new(output.image),
            display: Arc::new(display),
            metrics,
            report: output.report,
        };
        let previous = self.state.lock().result.replace(processed.clone());
        release_result(previous);

        tracing::info!(
            component = "coordinator",
            algorithm = %algorithm,
            rows = processed.buffer.rows(),
            cols = processed.buffer.cols(),
            processing_ms = processed.metrics.total_duration.as_secs_f64() * 1000.0,
            report = %processed.report.summary(),
            "image processed"
        );
        Ok(processed)
    }

    /// Cancels the run in progress, if any. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        match &self.state.lock().running {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // ── Saving ─────────────────────────────────────────────────

    /// Encodes the latest result.
    pub fn save(&self, format: OutputFormat) -> Result<Vec<u8>, PipelineError> {
        let result = self.result().ok_or(PipelineError::NoResult)?;
        let start = Instant::now();
        let bytes = self.encoder.encode(&result.buffer, format, &self.memory)?;
        tracing::info!(
            component = "coordinator",
            format = %format,
            bytes = bytes.len(),
            save_ms = start.elapsed().as_secs_f64() * 1000.0,
            "image encoded"
        );
        Ok(bytes)
    }

    /// Writes the latest result to `path`, choosing the format from its
    /// extension.
    pub fn save_path(&self, path: &Path) -> Result<OutputFormat, PipelineError> {
        let format = OutputFormat::from_path(path);
        let bytes = self.save(format)?;
        std::fs::write(path, bytes).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(format)
    }

    // ── Shutdown ───────────────────────────────────────────────

    /// Cancels any run, releases the input and result, stops the monitor,
    /// and force-closes whatever is still registered.
    ///
    /// Returns the number of buffers the manager had to force-close.
    pub fn shutdown(&self) -> usize {
        let (input, result) = {
            let mut state = self.state.lock();
            if let Some(token) = state.running.take() {
                token.cancel();
            }
            (state.input.take(), state.result.take())
        };
        release_input(input);
        release_result(result);

        let forced = self.memory.shutdown();
        let stats = self.memory.stats();
        tracing::info!(
            component = "coordinator",
            forced,
            allocations = stats.allocations,
            peak_bytes = stats.peak_used_bytes,
            "coordinator shut down"
        );
        forced
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.memory.stop_monitor();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("algorithm", &self.registry.current())
            .field("budget", &self.memory.budget())
            .field("used_bytes", &self.memory.used_bytes())
            .finish_non_exhaustive()
    }
}

fn release_input(input: Option<Arc<PixelBuffer>>) {
    if let Some(buffer) = input {
        buffer.close();
    }
}

fn release_result(result: Option<ProcessedImage>) {
    if let Some(result) = result {
        result.buffer.close();
    }
}

/// A cancel issued because the timer fired is a deadline, not a request.
fn as_deadline(err: AlgorithmError) -> AlgorithmError {
    match err {
        AlgorithmError::Cancelled {
            stage,
            reason: CancelReason::Requested,
        } => AlgorithmError::Cancelled {
            stage,
            reason: CancelReason::DeadlineExceeded,
        },
        other => other,
    }
}
