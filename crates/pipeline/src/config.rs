// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipeline configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! memory_budget = "2G"
//! algorithm = "2D Otsu"
//! output_format = "png"
//! processing_timeout_secs = 30.0
//! composite_alpha = true
//!
//! [monitor]
//! interval_secs = 30.0
//! stale_threshold = 50
//! stale_report_count = 5
//! reclaim_ratio = 0.8
//!
//! [parameters."2D Otsu"]
//! window_size = 9
//! noise_robustness = true
//!
//! [parameters.triclass]
//! initial_threshold_method = "median"
//! ```

use crate::{OutputFormat, PipelineError};
use memory_manager::{MemoryBudget, MonitorConfig};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thresholding::{Algorithm, AlgorithmRegistry, ParameterSet, Thresholder};

/// Configuration for the [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    /// Memory ceiling (human-readable, e.g., `"512M"`).
    #[serde(default = "default_budget")]
    pub memory_budget: String,
    /// Algorithm selected at start-up: display name or alias.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// `"png"` or `"jpeg"`; anything else falls back to PNG with a warning.
    #[serde(default = "default_format")]
    pub output_format: String,
    /// Upper bound on one `process` call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_timeout_secs: Option<f64>,
    /// Composite RGBA input over white instead of keeping alpha.
    #[serde(default = "default_true")]
    pub composite_alpha: bool,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Per-algorithm overrides, keyed by display name or alias.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSet>,
}

fn default_budget() -> String {
    "2G".to_string()
}

fn default_algorithm() -> String {
    Algorithm::Otsu2D.name().to_string()
}

fn default_format() -> String {
    "png".to_string()
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        toml::from_str(toml_str)
            .map_err(|e| PipelineError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("TOML serialise error: {e}")))
    }

    pub fn parse_budget(&self) -> Result<MemoryBudget, PipelineError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| PipelineError::Config(format!("invalid budget: {e}")))
    }

    pub fn parse_algorithm(&self) -> Result<Algorithm, PipelineError> {
        Algorithm::parse(&self.algorithm).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_name(&self.output_format)
    }

    /// `None` when unset; rejects non-positive or non-finite values.
    pub fn timeout(&self) -> Result<Option<Duration>, PipelineError> {
        match self.processing_timeout_secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
            Some(secs) => Err(PipelineError::Config(format!(
                "processing_timeout_secs must be positive, got {secs}"
            ))),
        }
    }

    /// Checks every field that can be checked without running anything,
    /// including each parameter table against its algorithm's schema.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.parse_budget()?;
        self.parse_algorithm()?;
        self.timeout()?;
        if !(0.0..=1.0).contains(&self.monitor.reclaim_ratio) {
            return Err(PipelineError::Config(format!(
                "monitor.reclaim_ratio must be within 0..=1, got {}",
                self.monitor.reclaim_ratio
            )));
        }
        for (algorithm, overrides) in self.resolved_parameters()? {
            algorithm
                .validate(&overrides)
                .map_err(|e| PipelineError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Parameter tables keyed by the algorithm they name.
    pub fn resolved_parameters(&self) -> Result<Vec<(Algorithm, ParameterSet)>, PipelineError> {
        self.parameters
            .iter()
            .map(|(id, set)| {
                Algorithm::parse(id)
                    .map(|a| (a, set.clone()))
                    .map_err(|e| PipelineError::Config(format!("[parameters.{id}]: {e}")))
            })
            .collect()
    }

    /// Selects the configured algorithm and stores every override.
    pub fn apply_to(&self, registry: &AlgorithmRegistry) -> Result<(), PipelineError> {
        for (algorithm, overrides) in self.resolved_parameters()? {
            registry.set_parameters(algorithm, &overrides);
        }
        registry
            .select(&self.algorithm)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            memory_budget: default_budget(),
            algorithm: default_algorithm(),
            output_format: default_format(),
            processing_timeout_secs: None,
            composite_alpha: true,
            monitor: MonitorConfig::default(),
            parameters: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thresholding::ParamValue;

    #[test]
    fn test_default() {
        let c = PipelineConfig::default();
        assert_eq!(c.memory_budget, "2G");
        assert_eq!(c.algorithm, "2D Otsu");
        assert!(c.composite_alpha);
        assert_eq!(c.parse_budget().unwrap(), MemoryBudget::default());
        assert_eq!(c.monitor.interval, Duration::from_secs(30));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
memory_budget = "256M"
algorithm = "triclass"
output_format = "jpeg"
processing_timeout_secs = 2.5

[monitor]
interval_secs = 5.0
stale_threshold = 10

[parameters.triclass]
initial_threshold_method = "median"
max_iterations = 12
class_separation = 0.3
"#;
        let c = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(c.parse_budget().unwrap().as_mb(), 256);
        assert_eq!(c.parse_algorithm().unwrap(), Algorithm::IterativeTriclass);
        assert_eq!(c.output_format(), OutputFormat::Jpeg);
        assert_eq!(c.timeout().unwrap(), Some(Duration::from_millis(2500)));
        assert_eq!(c.monitor.interval, Duration::from_secs(5));
        assert_eq!(c.monitor.stale_report_count, 5);
        let params = &c.parameters["triclass"];
        assert_eq!(params.get("max_iterations"), Some(&ParamValue::Int(12)));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let c = PipelineConfig::from_toml("").unwrap();
        assert_eq!(c, PipelineConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let mut c = PipelineConfig::default();
        c.parameters.insert(
            "2D Otsu".into(),
            ParameterSet::new().with("window_size", 9).with("smoothing_strength", 1.5),
        );
        let text = c.to_toml().unwrap();
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), c);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_params = PipelineConfig {
            parameters: [(
                "otsu".to_string(),
                ParameterSet::new().with("window_size", 4),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert!(matches!(bad_params.validate(), Err(PipelineError::Config(_))));

        let bad_alg = PipelineConfig {
            algorithm: "sauvola".into(),
            ..Default::default()
        };
        assert!(bad_alg.validate().is_err());

        let bad_timeout = PipelineConfig {
            processing_timeout_secs: Some(0.0),
            ..Default::default()
        };
        assert!(bad_timeout.validate().is_err());

        let bad_budget = PipelineConfig {
            memory_budget: "lots".into(),
            ..Default::default()
        };
        assert!(bad_budget.validate().is_err());
    }

    #[test]
    fn test_apply_to_registry() {
        let registry = AlgorithmRegistry::new();
        let c = PipelineConfig::from_toml(
            r#"
algorithm = "Iterative Triclass"
[parameters.otsu2d]
window_size = 11
"#,
        )
        .unwrap();
        c.apply_to(&registry).unwrap();
        assert_eq!(registry.current(), Algorithm::IterativeTriclass);
        assert_eq!(
            registry.get_parameter(Algorithm::Otsu2D, "window_size"),
            Some(ParamValue::Int(11))
        );
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/binarize.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
