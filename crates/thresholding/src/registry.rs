// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Registry of algorithms with the current selection and per-algorithm
//! parameter overrides.

use crate::{
    Algorithm, AlgorithmError, ParamValue, ParameterSet, ProcessingContext, ThresholdOutput,
    Thresholder,
};
use memory_manager::MemoryManager;
use parking_lot::RwLock;
use pixel_buffer::PixelBuffer;
use std::collections::BTreeMap;

#[derive(Debug)]
struct RegistryState {
    current: Algorithm,
    parameters: BTreeMap<Algorithm, ParameterSet>,
}

/// Maps identifiers to algorithms and holds the parameters each will run
/// with.
///
/// Stored parameters are validated when the algorithm runs, not when set.
/// Safe to share across threads.
#[derive(Debug)]
pub struct AlgorithmRegistry {
    state: RwLock<RegistryState>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry {
    /// Every algorithm registered with its defaults; "2D Otsu" is current.
    pub fn new() -> Self {
        let parameters = Algorithm::ALL
            .iter()
            .map(|a| (*a, a.default_parameters()))
            .collect();
        Self {
            state: RwLock::new(RegistryState {
                current: Algorithm::Otsu2D,
                parameters,
            }),
        }
    }

    pub fn available(&self) -> Vec<Algorithm> {
        self.state.read().parameters.keys().copied().collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.available().iter().map(|a| a.name()).collect()
    }

    /// Looks up `id` without changing the selection.
    pub fn get(&self, id: &str) -> Result<Algorithm, AlgorithmError> {
        Algorithm::parse(id)
    }

    pub fn current(&self) -> Algorithm {
        self.state.read().current
    }

    /// Makes `id` the current algorithm.
    pub fn select(&self, id: &str) -> Result<Algorithm, AlgorithmError> {
        let algorithm = Algorithm::parse(id)?;
        let previous = std::mem::replace(&mut self.state.write().current, algorithm);
        if previous != algorithm {
            tracing::info!(
                component = "registry",
                from = previous.name(),
                to = algorithm.name(),
                "algorithm selected"
            );
        }
        Ok(algorithm)
    }

    pub fn parameters(&self, algorithm: Algorithm) -> ParameterSet {
        self.state
            .read()
            .parameters
            .get(&algorithm)
            .cloned()
            .unwrap_or_else(|| algorithm.default_parameters())
    }

    pub fn get_parameter(&self, algorithm: Algorithm, name: &str) -> Option<ParamValue> {
        self.state
            .read()
            .parameters
            .get(&algorithm)
            .and_then(|set| set.get(name).cloned())
    }

    pub fn set_parameter(&self, algorithm: Algorithm, name: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        tracing::debug!(
            component = "registry",
            algorithm = algorithm.name(),
            name,
            value = %value,
            "parameter set"
        );
        self.state
            .write()
            .parameters
            .entry(algorithm)
            .or_insert_with(|| algorithm.default_parameters())
            .set(name, value);
    }

    /// Overlays `overrides` onto the stored parameters.
    pub fn set_parameters(&self, algorithm: Algorithm, overrides: &ParameterSet) {
        self.state
            .write()
            .parameters
            .entry(algorithm)
            .or_insert_with(|| algorithm.default_parameters())
            .merge(overrides);
    }

    pub fn reset_parameters(&self, algorithm: Algorithm) {
        self.state
            .write()
            .parameters
            .insert(algorithm, algorithm.default_parameters());
    }

    /// The current algorithm and its parameters, read under one lock.
    pub fn snapshot(&self) -> (Algorithm, ParameterSet) {
        let state = self.state.read();
        let params = state
            .parameters
            .get(&state.current)
            .cloned()
            .unwrap_or_else(|| state.current.default_parameters());
        (state.current, params)
    }

    /// Runs the current algorithm with its stored parameters.
    ///
    /// The lock is released before processing starts.
    pub fn process(
        &self,
        input: &PixelBuffer,
        ctx: &ProcessingContext,
        memory: &MemoryManager,
    ) -> Result<(Algorithm, ThresholdOutput), AlgorithmError> {
        let (algorithm, params) = self.snapshot();
        let output = algorithm.process(input, &params, ctx, memory)?;
        Ok((algorithm, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;
    use memory_manager::MemoryBudget;
    use pixel_buffer::PixelFormat;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let r = AlgorithmRegistry::new();
        assert_eq!(r.current(), Algorithm::Otsu2D);
        assert_eq!(r.names(), vec!["2D Otsu", "Iterative Triclass"]);
        assert_eq!(
            r.get_parameter(Algorithm::Otsu2D, "window_size"),
            Some(ParamValue::Int(7))
        );
        assert_eq!(
            r.get_parameter(Algorithm::IterativeTriclass, "initial_threshold_method"),
            Some(ParamValue::Str("otsu".into()))
        );
    }

    #[test]
    fn test_select() {
        let r = AlgorithmRegistry::new();
        assert_eq!(r.select("triclass").unwrap(), Algorithm::IterativeTriclass);
        assert_eq!(r.current(), Algorithm::IterativeTriclass);
        assert!(matches!(
            r.select("niblack"),
            Err(AlgorithmError::UnknownAlgorithm(_))
        ));
        assert_eq!(r.current(), Algorithm::IterativeTriclass);
        assert_eq!(r.get("2D Otsu").unwrap(), Algorithm::Otsu2D);
    }

    #[test]
    fn test_parameter_overrides() {
        let r = AlgorithmRegistry::new();
        r.set_parameter(Algorithm::Otsu2D, "window_size", 11);
        r.set_parameters(
            Algorithm::Otsu2D,
            &ParameterSet::new().with("noise_robustness", true),
        );
        let (alg, params) = r.snapshot();
        assert_eq!(alg, Algorithm::Otsu2D);
        assert_eq!(params.get("window_size"), Some(&ParamValue::Int(11)));
        assert_eq!(params.get("noise_robustness"), Some(&ParamValue::Bool(true)));

        r.reset_parameters(Algorithm::Otsu2D);
        assert_eq!(
            r.parameters(Algorithm::Otsu2D),
            Algorithm::Otsu2D.default_parameters()
        );
    }

    #[test]
    fn test_invalid_stored_parameter_fails_at_process() {
        let r = AlgorithmRegistry::new();
        let m = MemoryManager::new(MemoryBudget::from_mb(1));
        r.set_parameter(Algorithm::Otsu2D, "window_size", 4);
        let input = PixelBuffer::from_vec(4, 4, PixelFormat::Gray8, vec![9; 16]).unwrap();
        let err = r.process(&input, &ProcessingContext::new(), &m).unwrap_err();
        assert!(matches!(
            err,
            AlgorithmError::Validation(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_process_uses_current() {
        let r = AlgorithmRegistry::new();
        let m = MemoryManager::new(MemoryBudget::from_mb(1));
        r.select("Iterative Triclass").unwrap();
        let input = PixelBuffer::from_vec(8, 8, PixelFormat::Gray8, vec![100; 64]).unwrap();
        let (alg, out) = r.process(&input, &ProcessingContext::new(), &m).unwrap();
        assert_eq!(alg, Algorithm::IterativeTriclass);
        assert!(matches!(out.report, crate::AlgorithmReport::Triclass(_)));
    }

    #[test]
    fn test_concurrent_access() {
        let r = Arc::new(AlgorithmRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            r.select("otsu").unwrap();
                            r.set_parameter(Algorithm::Otsu2D, "window_size", 9);
                        } else {
                            r.select("triclass").unwrap();
                            let _ = r.snapshot();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            r.get_parameter(Algorithm::Otsu2D, "window_size"),
            Some(ParamValue::Int(9))
        );
    }
}
