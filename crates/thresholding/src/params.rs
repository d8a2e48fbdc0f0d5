// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Algorithm parameters: untyped values, per-algorithm schemas, and
//! central validation.
//!
//! Callers hand algorithms a [`ParameterSet`] (name → [`ParamValue`]).
//! Each algorithm declares a static [`ParameterSchema`]; validation checks
//! every supplied entry against it, fills in defaults, and returns a
//! [`ValidatedParams`] the algorithm reads its typed settings from.

use crate::ValidationError;
use std::collections::BTreeMap;
use std::fmt;

// ── Values ───────────────────────────────────────────────────────

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Parses a command-line literal: `true`/`false`, then integer, then
    /// float, otherwise a string.
    pub fn parse_literal(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Str(trimmed.to_string())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Caller-supplied parameters, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, ParamValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Inserts or replaces a value, returning the previous one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    /// Overwrites entries in `self` with those of `other`.
    pub fn merge(&mut self, other: &ParameterSet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ── Schema ───────────────────────────────────────────────────────

/// The domain of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Bool,
    /// Inclusive integer range. `odd` rejects even values; `zero_means_auto`
    /// accepts `0` outside the range as "choose automatically".
    Int {
        min: i64,
        max: i64,
        odd: bool,
        zero_means_auto: bool,
    },
    /// Inclusive float range. Integers are accepted and widened.
    Float { min: f64, max: f64 },
    /// One of a fixed set of lowercase names, matched case-insensitively.
    Choice(&'static [&'static str]),
}

impl ParamKind {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int { .. } => "int",
            Self::Float { .. } => "float",
            Self::Choice(_) => "string",
        }
    }

    /// Human-readable domain, used in errors and listings.
    pub fn describe(&self) -> String {
        match self {
            Self::Bool => "true | false".to_string(),
            Self::Int {
                min,
                max,
                odd,
                zero_means_auto,
            } => {
                let mut s = format!("{min}..={max}");
                if *odd {
                    s.push_str(", odd");
                }
                if *zero_means_auto {
                    s.push_str(", or 0 for auto");
                }
                s
            }
            Self::Float { min, max } => format!("{min:.3}..={max:.3}"),
            Self::Choice(choices) => choices.join(" | "),
        }
    }
}

/// A default that can live in a `static`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_value(self) -> ParamValue {
        match self {
            Self::Bool(b) => ParamValue::Bool(b),
            Self::Int(i) => ParamValue::Int(i),
            Self::Float(f) => ParamValue::Float(f),
            Self::Str(s) => ParamValue::Str(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: DefaultValue,
    pub description: &'static str,
}

/// Every parameter an algorithm accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSchema {
    pub algorithm: &'static str,
    pub specs: &'static [ParamSpec],
}

impl ParameterSchema {
    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// A set holding every default.
    pub fn defaults(&self) -> ParameterSet {
        self.specs
            .iter()
            .map(|s| (s.name, s.default.to_value()))
            .collect()
    }

    /// Checks every entry of `params` and fills in defaults for the rest.
    ///
    /// Fails on the first unknown name, type mismatch, or out-of-domain value.
    pub fn validate(&self, params: &ParameterSet) -> Result<ValidatedParams, ValidationError> {
        let mut values: BTreeMap<&'static str, ParamValue> = self
            .specs
            .iter()
            .map(|s| (s.name, s.default.to_value()))
            .collect();

        for (name, value) in params.iter() {
            let spec = self
                .spec(name)
                .ok_or_else(|| ValidationError::UnknownParameter {
                    algorithm: self.algorithm,
                    name: name.to_string(),
                })?;
            let checked = self.check(spec, value)?;
            values.insert(spec.name, checked);
        }
        Ok(ValidatedParams { values })
    }

    fn check(&self, spec: &ParamSpec, value: &ParamValue) -> Result<ParamValue, ValidationError> {
        let wrong_type = || ValidationError::WrongType {
            algorithm: self.algorithm,
            name: spec.name.to_string(),
            value: value.clone(),
            actual: value.kind_name(),
            expected: spec.kind.type_name(),
        };
        let out_of_range = || ValidationError::OutOfRange {
            algorithm: self.algorithm,
            name: spec.name.to_string(),
            value: value.clone(),
            expected: spec.kind.describe(),
        };

        match spec.kind {
            ParamKind::Bool => value.as_bool().map(ParamValue::Bool).ok_or_else(wrong_type),
            ParamKind::Int {
                min,
                max,
                odd,
                zero_means_auto,
            } => {
                let v = value.as_int().ok_or_else(wrong_type)?;
                if v == 0 && zero_means_auto {
                    return Ok(ParamValue::Int(0));
                }
                if v < min || v > max || (odd && v % 2 == 0) {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Int(v))
            }
            ParamKind::Float { min, max } => {
                let v = value.as_float().ok_or_else(wrong_type)?;
                if !v.is_finite() || v < min || v > max {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Float(v))
            }
            ParamKind::Choice(choices) => {
                let v = value.as_str().ok_or_else(wrong_type)?.to_ascii_lowercase();
                if !choices.contains(&v.as_str()) {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Str(v))
            }
        }
    }
}

/// A complete, schema-checked parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    values: BTreeMap<&'static str, ParamValue>,
}

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub(crate) fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub(crate) fn int(&self, name: &str) -> i64 {
        self.get(name).and_then(ParamValue::as_int).unwrap_or(0)
    }

    pub(crate) fn float(&self, name: &str) -> f64 {
        self.get(name).and_then(ParamValue::as_float).unwrap_or(0.0)
    }

    pub(crate) fn str(&self, name: &str) -> &str {
        self.get(name).and_then(ParamValue::as_str).unwrap_or("")
    }

    /// Back to an untyped set, e.g. for display.
    pub fn to_set(&self) -> ParameterSet {
        self.values.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}
