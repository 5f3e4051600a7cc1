//! Named-feature extraction over finished audio segments.
//!
//! The extractor dispatches through an explicit [`FeatureRegistry`] table
//! built once and passed in by the caller; there is no global registry and
//! no registration side effects. Registered features are time-domain only.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::segment::AudioSegment;

/// Per-feature parameters as parsed from a JSON object.
pub type FeatureParams = serde_json::Map<String, Value>;

/// A pure feature function: segment plus parameters in, scalar out.
pub type FeatureFn = fn(&AudioSegment, &FeatureParams) -> Result<f64, FeatureError>;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("unknown features {unknown:?}; available features are {available:?}")]
    UnknownFeatures {
        unknown: Vec<String>,
        available: Vec<String>,
    },

    #[error("feature '{feature}' rejected parameter '{parameter}': {reason}")]
    InvalidParameter {
        feature: String,
        parameter: String,
        reason: String,
    },
}

/// Table mapping feature names to their compute functions.
pub struct FeatureRegistry {
    table: BTreeMap<&'static str, FeatureFn>,
}

impl FeatureRegistry {
    /// The built-in time-domain features.
    pub fn builtin() -> Self {
        let mut table: BTreeMap<&'static str, FeatureFn> = BTreeMap::new();
        table.insert("duration", compute_duration);
        table.insert("peak", compute_peak);
        table.insert("rms", compute_rms);
        table.insert("zero_cross_rate", compute_zero_cross_rate);
        Self { table }
    }

    pub fn names(&self) -> Vec<String> {
        self.table.keys().map(|name| name.to_string()).collect()
    }

    fn get(&self, name: &str) -> Option<FeatureFn> {
        self.table.get(name).copied()
    }
}

/// Which features to compute for a segment, plus their parameters.
#[derive(Debug, Clone)]
pub enum FeatureSelection {
    All,
    Named(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub selection: FeatureSelection,
    pub params: BTreeMap<String, FeatureParams>,
}

impl FeatureConfig {
    pub fn all() -> Self {
        Self {
            selection: FeatureSelection::All,
            params: BTreeMap::new(),
        }
    }

    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selection: FeatureSelection::Named(names.into_iter().map(Into::into).collect()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(mut self, feature: &str, params: FeatureParams) -> Self {
        self.params.insert(feature.to_string(), params);
        self
    }
}

/// Computes configured features for one segment at a time.
pub struct FeatureExtractor {
    registry: FeatureRegistry,
}

impl FeatureExtractor {
    pub fn new(registry: FeatureRegistry) -> Self {
        Self { registry }
    }

    /// Compute the configured features, returning a name-sorted mapping.
    ///
    /// Unknown feature names, whether selected or parameterized, fail up
    /// front listing the available set; no partial result is produced.
    pub fn compute(
        &self,
        segment: &AudioSegment,
        config: &FeatureConfig,
    ) -> Result<BTreeMap<String, f64>, FeatureError> {
        let names: Vec<String> = match &config.selection {
            FeatureSelection::All => self.registry.names(),
            FeatureSelection::Named(named) => named.clone(),
        };

        let mut resolved: Vec<(String, FeatureFn)> = Vec::with_capacity(names.len());
        let mut unknown: Vec<String> = Vec::new();
        for name in names {
            match self.registry.get(&name) {
                Some(function) => resolved.push((name, function)),
                None => unknown.push(name),
            }
        }
        for name in config.params.keys() {
            if self.registry.get(name).is_none() {
                unknown.push(name.clone());
            }
        }
        if !unknown.is_empty() {
            return Err(FeatureError::UnknownFeatures {
                unknown,
                available: self.registry.names(),
            });
        }

        let empty = FeatureParams::new();
        let mut values = BTreeMap::new();
        for (name, function) in resolved {
            let params = config.params.get(&name).unwrap_or(&empty);
            let value = function(segment, params)?;
            values.insert(name, value);
        }
        Ok(values)
    }
}

fn reject_unknown_params(
    feature: &str,
    params: &FeatureParams,
    allowed: &[&str],
) -> Result<(), FeatureError> {
    for key in params.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(FeatureError::InvalidParameter {
                feature: feature.to_string(),
                parameter: key.clone(),
                reason: format!("unknown parameter; allowed parameters are {allowed:?}"),
            });
        }
    }
    Ok(())
}

fn compute_duration(segment: &AudioSegment, params: &FeatureParams) -> Result<f64, FeatureError> {
    reject_unknown_params("duration", params, &[])?;
    Ok(segment.duration())
}

fn compute_peak(segment: &AudioSegment, params: &FeatureParams) -> Result<f64, FeatureError> {
    reject_unknown_params("peak", params, &[])?;
    let peak = segment
        .samples()
        .iter()
        .fold(0.0_f32, |max, sample| max.max(sample.abs()));
    Ok(f64::from(peak))
}

fn compute_rms(segment: &AudioSegment, params: &FeatureParams) -> Result<f64, FeatureError> {
    reject_unknown_params("rms", params, &[])?;
    let sum_sq: f64 = segment
        .samples()
        .iter()
        .map(|&sample| f64::from(sample) * f64::from(sample))
        .sum();
    Ok((sum_sq / segment.len() as f64).sqrt())
}

/// Sign changes per sample, or per second with `{"per_second": true}`.
fn compute_zero_cross_rate(
    segment: &AudioSegment,
    params: &FeatureParams,
) -> Result<f64, FeatureError> {
    reject_unknown_params("zero_cross_rate", params, &["per_second"])?;
    let per_second = match params.get("per_second") {
        None => false,
        Some(Value::Bool(flag)) => *flag,
        Some(other) => {
            return Err(FeatureError::InvalidParameter {
                feature: "zero_cross_rate".to_string(),
                parameter: "per_second".to_string(),
                reason: format!("expected a boolean, got {other}"),
            })
        }
    };
    let crossings = segment
        .samples()
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count() as f64;
    if per_second {
        Ok(crossings / segment.duration())
    } else {
        Ok(crossings / segment.len() as f64)
    }
}
