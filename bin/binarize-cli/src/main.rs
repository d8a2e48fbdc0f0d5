// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # binarize
//!
//! Command-line interface for the document binarization engine.
//!
//! ## Usage
//! ```bash
//! # Binarize a scan with the default algorithm (2D Otsu)
//! binarize run --input scan.jpg --output scan.png
//!
//! # Iterative triclass with overrides, scored against a ground truth
//! binarize run -i scan.jpg -o out.png -a triclass --set preprocessing=true \
//!     --ground-truth scan_gt.png
//!
//! # List algorithms and their parameters
//! binarize algorithms
//!
//! # Print the effective configuration
//! binarize --config binarize.toml config
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "binarize",
    about = "Memory-budgeted document image binarization",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (CLI arguments override it).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Binarize one image.
    Run {
        /// Input image (PNG or JPEG).
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the binary image.
        #[arg(short, long)]
        output: PathBuf,

        /// Algorithm name or alias: "2D Otsu", otsu, "Iterative Triclass", triclass.
        #[arg(short, long)]
        algorithm: Option<String>,

        /// Parameter override as key=value (repeatable).
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Output format: png or jpeg. Defaults to the output extension.
        #[arg(short, long)]
        format: Option<String>,

        /// Memory budget (e.g., "512M", "1G").
        #[arg(short = 'b', long)]
        memory_budget: Option<String>,

        /// Abort processing after this many seconds.
        #[arg(short, long)]
        timeout_secs: Option<f64>,

        /// Ground-truth image to score the result against.
        #[arg(short, long)]
        ground_truth: Option<PathBuf>,
    },

    /// List algorithms with their parameters, defaults, and ranges.
    Algorithms,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            input,
            output,
            algorithm,
            set,
            format,
            memory_budget,
            timeout_secs,
            ground_truth,
        } => {
            let options = commands::run::RunOptions {
                input,
                output,
                algorithm,
                overrides: set,
                format,
                memory_budget,
                timeout_secs,
                ground_truth,
            };
            commands::run::execute(cli.config, options).await
        }
        Commands::Algorithms => commands::algorithms::execute(cli.config),
        Commands::Config => commands::config::execute(cli.config),
    }
}
