// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `binarize run` command: decode, binarize, encode, and optionally score.
//!
//! ```text
//! load_path → process (spawn_blocking + timeout) → save → evaluate
//! ```

use anyhow::{bail, Context};
use pipeline::{quality, Coordinator, Decoder, ImageCodec, OutputFormat, ProcessedImage};
use std::path::PathBuf;
use thresholding::ParamValue;

/// Arguments of `binarize run`; `None` means "keep the configured value".
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub algorithm: Option<String>,
    pub overrides: Vec<String>,
    pub format: Option<String>,
    pub memory_budget: Option<String>,
    pub timeout_secs: Option<f64>,
    pub ground_truth: Option<PathBuf>,
}

pub async fn execute(config_path: Option<PathBuf>, options: RunOptions) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              binarize · Image Binarizer              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Configuration ──────────────────────────────────────────
    let mut config = super::load_config(config_path.as_deref())?;
    if let Some(algorithm) = &options.algorithm {
        config.algorithm = algorithm.clone();
    }
    if let Some(budget) = &options.memory_budget {
        config.memory_budget = budget.clone();
    }
    if options.timeout_secs.is_some() {
        config.processing_timeout_secs = options.timeout_secs;
    }
    let format = output_format(&options, config.output_format());

    let algorithm = config.parse_algorithm()?;
    let overrides = options
        .overrides
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    println!("  Config:");
    println!("   Input:     {}", options.input.display());
    println!("   Output:    {} ({format})", options.output.display());
    println!("   Algorithm: {algorithm}");
    println!("   Budget:    {}", config.parse_budget()?);
    if let Some(secs) = config.processing_timeout_secs {
        println!("   Timeout:   {secs}s");
    }
    println!();

    let coordinator = Coordinator::new(config)?;
    for (name, value) in overrides {
        coordinator.registry().set_parameter(algorithm, &name, value);
    }
    let result = run_pipeline(&coordinator, &options, format).await;
    let forced = coordinator.shutdown();
    if forced > 0 {
        tracing::warn!(forced, "buffers were still registered at shutdown");
    }
    let result = result?;

    print_results(&result);
    Ok(())
}

async fn run_pipeline(
    coordinator: &Coordinator,
    options: &RunOptions,
    format: OutputFormat,
) -> anyhow::Result<ProcessedImage> {
    println!("  [1/3] Loading image...");
    let input = coordinator
        .load_path(&options.input)
        .with_context(|| format!("failed to load '{}'", options.input.display()))?;
    println!(
        "        {}x{} {}",
        input.cols(),
        input.rows(),
        input.format()
    );
    println!();

    println!("  [2/3] Processing...");
    let parameters = coordinator.registry().parameters(coordinator.registry().current());
    for (name, value) in parameters.iter() {
        println!("        {name} = {value}");
    }
    let result = coordinator.process().await?;
    println!("        {}", result.report.summary());
    println!();

    println!("  [3/3] Saving...");
    let bytes = coordinator.save(format)?;
    std::fs::write(&options.output, &bytes)
        .with_context(|| format!("failed to write '{}'", options.output.display()))?;
    println!("        {} bytes written", bytes.len());
    println!();

    if let Some(path) = &options.ground_truth {
        let encoded =
            std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        let truth = ImageCodec::default().decode(&encoded, coordinator.memory())?;
        let report = quality::evaluate(&result.buffer, &truth)?;
        println!("  Quality vs {}:", path.display());
        println!("   {}", report.summary());
        println!();
    }

    Ok(result)
}

/// `--format` wins, then the output extension, then the configuration.
fn output_format(options: &RunOptions, configured: OutputFormat) -> OutputFormat {
    match (&options.format, options.output.extension()) {
        (Some(name), _) => OutputFormat::from_name(name),
        (None, Some(_)) => OutputFormat::from_path(&options.output),
        (None, None) => configured,
    }
}

/// Splits `key=value`, inferring the value's type.
fn parse_assignment(text: &str) -> anyhow::Result<(String, ParamValue)> {
    let Some((name, value)) = text.split_once('=') else {
        bail!("expected KEY=VALUE, got '{text}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("missing parameter name in '{text}'");
    }
    Ok((name.to_string(), ParamValue::parse_literal(value.trim())))
}

fn print_results(result: &ProcessedImage) {
    println!("  Metrics:");
    println!("   {}", result.metrics.summary());
    for timing in &result.metrics.stages {
        println!(
            "     {:<22} {:>8.2} ms",
            timing.stage.as_str(),
            timing.elapsed.as_secs_f64() * 1000.0
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(output: &str, format: Option<&str>) -> RunOptions {
        RunOptions {
            input: "in.png".into(),
            output: output.into(),
            algorithm: None,
            overrides: Vec::new(),
            format: format.map(String::from),
            memory_budget: None,
            timeout_secs: None,
            ground_truth: None,
        }
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("window_size=9").unwrap(),
            ("window_size".to_string(), ParamValue::Int(9))
        );
        assert_eq!(
            parse_assignment(" preprocessing = true ").unwrap(),
            ("preprocessing".to_string(), ParamValue::Bool(true))
        );
        assert_eq!(
            parse_assignment("initial_threshold_method=median").unwrap().1,
            ParamValue::Str("median".into())
        );
        assert!(parse_assignment("window_size").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn test_output_format_precedence() {
        assert_eq!(
            output_format(&options("out.png", Some("jpeg")), OutputFormat::Png),
            OutputFormat::Jpeg
        );
        assert_eq!(
            output_format(&options("out.jpg", None), OutputFormat::Png),
            OutputFormat::Jpeg
        );
        assert_eq!(
            output_format(&options("out", None), OutputFormat::Jpeg),
            OutputFormat::Jpeg
        );
    }
}
