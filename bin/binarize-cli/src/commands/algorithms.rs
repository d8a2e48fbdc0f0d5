// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `binarize algorithms` command: list algorithms and their parameters.

use std::path::PathBuf;
use thresholding::{Algorithm, AlgorithmRegistry, Thresholder};

pub fn execute(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config(config.as_deref())?;
    let registry = AlgorithmRegistry::new();
    config.apply_to(&registry)?;

    for algorithm in Algorithm::ALL {
        let marker = if algorithm == registry.current() { " (selected)" } else { "" };
        println!("{}{marker}", algorithm.name());
        println!(
            "  {:<28} {:<10} {:<34} {}",
            "Parameter", "Value", "Range", "Description"
        );
        println!("  {}", "-".repeat(100));

        let configured = registry.parameters(algorithm);
        for spec in algorithm.schema().specs {
            let value = configured
                .get(spec.name)
                .cloned()
                .unwrap_or_else(|| spec.default.to_value());
            println!(
                "  {:<28} {:<10} {:<34} {}",
                spec.name,
                value.to_string(),
                spec.kind.describe(),
                spec.description
            );
        }
        println!();
    }
    Ok(())
}
