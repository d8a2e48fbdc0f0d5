// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: Compare binarization algorithms on a synthetic degraded page.
//!
//! Renders a page with uneven illumination and ink strokes, runs every
//! algorithm under a few parameter variations, and scores each result
//! against the known ground truth.
//!
//! ```bash
//! cargo run -p pipeline --example algorithm_comparison
//! ```

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use pipeline::{quality, Coordinator, PipelineConfig};
use pixel_buffer::{PixelBuffer, PixelFormat};
use std::io::Cursor;
use thresholding::{Algorithm, ParamValue};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let (page, truth) = degraded_page(480, 320);
    let mut encoded = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(page).write_to(&mut encoded, ImageFormat::Png)?;
    let truth = PixelBuffer::from_vec(320, 480, PixelFormat::Gray8, truth.into_raw())?;

    let coordinator = Coordinator::new(PipelineConfig {
        memory_budget: "256M".into(),
        ..Default::default()
    })?;
    coordinator.load_image(encoded.get_ref())?;

    let variants: Vec<(Algorithm, &str, Vec<(&str, ParamValue)>)> = vec![
        (Algorithm::Otsu2D, "defaults", vec![]),
        (
            Algorithm::Otsu2D,
            "clahe + log histogram",
            vec![
                ("apply_contrast_enhancement", true.into()),
                ("use_log_histogram", true.into()),
            ],
        ),
        (
            Algorithm::Otsu2D,
            "edge preservation + noise robustness",
            vec![
                ("edge_preservation", true.into()),
                ("noise_robustness", true.into()),
            ],
        ),
        (Algorithm::IterativeTriclass, "defaults", vec![]),
        (
            Algorithm::IterativeTriclass,
            "median start + preprocessing",
            vec![
                ("initial_threshold_method", "median".into()),
                ("preprocessing", true.into()),
            ],
        ),
    ];

    println!(
        "{:<20} {:<38} {:>9} {:>9} {:>8} {:>9}",
        "Algorithm", "Variant", "F", "pseudo-F", "DRD", "Time ms",
    );
    println!("{}", "-".repeat(98));

    for (algorithm, label, overrides) in &variants {
        let registry = coordinator.registry();
        registry.reset_parameters(*algorithm);
        for (name, value) in overrides {
            registry.set_parameter(*algorithm, name, value.clone());
        }

        match coordinator.process_with(*algorithm).await {
            Ok(result) => {
                let q = quality::evaluate(&result.buffer, &truth)?;
                println!(
                    "{:<20} {:<38} {:>9.4} {:>9.4} {:>8.3} {:>9.2}",
                    algorithm.name(),
                    label,
                    q.f_measure,
                    q.pseudo_f_measure,
                    q.drd,
                    result.metrics.total_duration.as_secs_f64() * 1000.0,
                );
            }
            Err(e) => println!("{:<20} {:<38} FAILED: {e}", algorithm.name(), label),
        }
    }

    let stats = coordinator.memory().stats();
    println!(
        "\nMemory: {} allocations, {:.1}% reused, peak {:.2} MB",
        stats.allocations,
        stats.reuse_ratio() * 100.0,
        stats.peak_used_bytes as f64 / (1024.0 * 1024.0),
    );
    coordinator.shutdown();
    Ok(())
}

/// Paper brightening from left to right, a shadow band, and dark strokes.
fn degraded_page(w: u32, h: u32) -> (GrayImage, GrayImage) {
    let ink = |x: u32, y: u32| {
        let line = (y % 32) >= 12 && (y % 32) < 18 && (x % 64) < 52 && x > 16 && x < w - 16;
        let stem = (x % 64) >= 20 && (x % 64) < 25 && y > 16 && y < h - 16;
        line || stem
    };
    let page = GrayImage::from_fn(w, h, |x, y| {
        let paper = 150.0 + 80.0 * x as f32 / w as f32;
        let shadow = if (h / 3..h / 2).contains(&y) { 35.0 } else { 0.0 };
        let grain = ((x * 31 + y * 17) % 11) as f32 - 5.0;
        let level = if ink(x, y) { 50.0 } else { paper - shadow };
        Luma([(level + grain).clamp(0.0, 255.0) as u8])
    });
    let truth = GrayImage::from_fn(w, h, |x, y| Luma([if ink(x, y) { 0 } else { 255 }]));
    (page, truth)
}
