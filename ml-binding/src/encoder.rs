//! Feature encoder: named request fields -> fixed-order feature vector
//!
//! Each domain has a fixed column order matching what its classifiers were
//! trained on. Categorical columns go through the [`LabelRegistry`] and are
//! all validated before any numeric column is parsed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::unified_error::ValidationError;
use crate::labels::{LabelRegistry, VocabularyKind};

/// Recommendation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Crop,
    Fertilizer,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Crop, Domain::Fertilizer];

    /// Ordered input columns for this domain
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            Domain::Crop => CROP_SCHEMA,
            Domain::Fertilizer => FERTILIZER_SCHEMA,
        }
    }

    /// Vocabulary the classifiers' predicted codes decode through
    pub fn target_vocabulary(&self) -> VocabularyKind {
        match self {
            Domain::Crop => VocabularyKind::Crop,
            Domain::Fertilizer => VocabularyKind::Fertilizer,
        }
    }

    /// Canonical ensemble role order
    pub fn default_roles(&self) -> &'static [&'static str] {
        match self {
            Domain::Crop => &["xgb", "rf", "knn"],
            Domain::Fertilizer => &["xgb", "rf", "svm"],
        }
    }

    pub fn num_features(&self) -> usize {
        self.schema().len()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Crop => f.write_str("crop"),
            Domain::Fertilizer => f.write_str("fertilizer"),
        }
    }
}

/// One input column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpec {
    Numeric(&'static str),
    Categorical(&'static str, VocabularyKind),
}

impl FieldSpec {
    pub fn name(&self) -> &'static str {
        match self {
            FieldSpec::Numeric(name) | FieldSpec::Categorical(name, _) => name,
        }
    }
}

const CROP_SCHEMA: &[FieldSpec] = &[
    FieldSpec::Numeric("Nitrogen"),
    FieldSpec::Numeric("Phosphorus"),
    FieldSpec::Numeric("Potassium"),
    FieldSpec::Numeric("Temperature"),
    FieldSpec::Numeric("Humidity"),
    FieldSpec::Numeric("pH_Value"),
    FieldSpec::Numeric("Rainfall"),
];

const FERTILIZER_SCHEMA: &[FieldSpec] = &[
    FieldSpec::Numeric("Temperature"),
    FieldSpec::Numeric("Humidity"),
    FieldSpec::Numeric("Moisture"),
    FieldSpec::Categorical("Soil_Type", VocabularyKind::SoilType),
    FieldSpec::Categorical("Crop_Type", VocabularyKind::CropType),
    FieldSpec::Numeric("Nitrogen"),
    FieldSpec::Numeric("Potassium"),
    FieldSpec::Numeric("Phosphorus"),
];

/// Immutable, domain-ordered model input
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    domain: Domain,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Flatten a JSON request object into string fields.
///
/// Strings pass through, numbers keep their JSON text and booleans become
/// `true` / `false`. Nulls, arrays and nested objects are dropped, so they
/// read as absent. Returns `None` when `value` is not an object.
pub fn fields_from_json(value: Value) -> Option<HashMap<String, String>> {
    let Value::Object(map) = value else {
        return None;
    };
    Some(
        map.into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Number(n) => Some((k, n.to_string())),
                Value::Bool(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect(),
    )
}

/// Name of the first schema field absent from `fields`, if any
pub fn first_missing_field(domain: Domain, fields: &HashMap<String, String>) -> Option<&'static str> {
    domain
        .schema()
        .iter()
        .map(FieldSpec::name)
        .find(|name| !fields.contains_key(*name))
}

/// Encode request fields into the domain's feature vector
pub fn encode(
    domain: Domain,
    fields: &HashMap<String, String>,
    registry: &LabelRegistry,
) -> Result<FeatureVector, ValidationError> {
    let schema = domain.schema();
    let mut values = vec![0.0; schema.len()];

    // Categorical pass first so a bad category never coexists with parsed numerics
    for (slot, spec) in schema.iter().enumerate() {
        if let FieldSpec::Categorical(name, kind) = spec {
            let raw = fields.get(*name).ok_or_else(|| ValidationError::MissingField {
                field: name.to_string(),
            })?;
            values[slot] = registry.encode(*kind, name, raw)? as f64;
        }
    }

    for (slot, spec) in schema.iter().enumerate() {
        if let FieldSpec::Numeric(name) = spec {
            values[slot] = parse_numeric(name, fields.get(*name))?;
        }
    }

    Ok(FeatureVector { domain, values })
}

fn parse_numeric(field: &str, raw: Option<&String>) -> Result<f64, ValidationError> {
    let invalid = || ValidationError::InvalidNumericField {
        field: field.to_string(),
        value: raw.cloned(),
    };
    let raw = raw.ok_or_else(invalid)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(invalid()),
    }
}
