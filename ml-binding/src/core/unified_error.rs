//! Unified error types for the recommendation engine
//!
//! Errors are split by who is at fault:
//! - [`ValidationError`]: the caller sent bad input (client error)
//! - [`InferenceError`]: a classifier rejected a structurally valid vector
//! - [`RecommendError`]: what a recommendation request ultimately fails with
//! - [`ModelLoadError`] / [`ConfigError`]: startup failures, always fatal

use std::path::PathBuf;

use thiserror::Error;

use crate::encoder::Domain;
use crate::labels::VocabularyKind;

/// Bad, missing, or unknown-category input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    #[error("invalid numeric value for '{field}'{}", describe_value(.value))]
    InvalidNumericField {
        field: String,
        value: Option<String>,
    },

    #[error("unknown value '{value}' for '{field}'")]
    UnknownCategory { field: String, value: String },
}

impl ValidationError {
    /// Name of the offending request field
    pub fn field(&self) -> &str {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::InvalidNumericField { field, .. }
            | ValidationError::UnknownCategory { field, .. } => field,
        }
    }
}

fn describe_value(value: &Option<String>) -> String {
    match value {
        Some(v) => format!(": '{}'", v),
        None => " (field absent)".to_string(),
    }
}

/// A classifier could not produce a prediction for a vector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model produced a non-finite {what}")]
    NonFinite { what: &'static str },

    #[error("class index {index} out of range for {num_classes} classes")]
    ClassOutOfRange { index: usize, num_classes: usize },

    #[error("label code {code} is not in the {vocabulary} vocabulary")]
    UnknownLabelCode { code: usize, vocabulary: String },

    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },
}

/// Failure of a whole recommendation request
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{domain} recommendation models are not loaded")]
    ModelUnavailable { domain: Domain },

    #[error("classifier '{role}' failed: {source}")]
    Inference {
        role: String,
        #[source]
        source: InferenceError,
    },

    #[error("only {succeeded} of {total} classifiers produced a label, no majority possible")]
    NoMajority { succeeded: usize, total: usize },
}

impl RecommendError {
    /// True when the request itself was at fault (4xx), false for server-side failures
    pub fn is_client_error(&self) -> bool {
        matches!(self, RecommendError::Validation(_))
    }
}

/// Problem with the contents of a single model artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Model store failure at startup
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model artifact '{}': {source}", .path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: ArtifactError,
    },

    #[error("role '{role}' expects {actual} features but the {domain} schema has {expected}")]
    SchemaMismatch {
        role: String,
        domain: Domain,
        expected: usize,
        actual: usize,
    },

    #[error("role '{role}' can predict code {code} but the vocabulary has {vocabulary_size} entries")]
    LabelCodeOutOfRange {
        role: String,
        code: usize,
        vocabulary_size: usize,
    },

    #[error("{domain} domain needs a {kind} vocabulary but none is configured")]
    MissingVocabulary {
        domain: Domain,
        kind: VocabularyKind,
    },

    #[error("{domain} domain has no classifier roles configured")]
    EmptyEnsemble { domain: Domain },

    #[error("{domain} domain lists role '{role}' more than once")]
    DuplicateRole { domain: Domain, role: String },

    #[error("role name '{role}' in the {domain} domain clashes with a response key")]
    ReservedRoleName { domain: Domain, role: String },
}

/// Configuration file failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Helper functions for creating errors
pub mod errors {
    use super::{ArtifactError, InferenceError};

    pub fn invalid_artifact(message: impl Into<String>) -> ArtifactError {
        ArtifactError::Invalid(message.into())
    }

    pub fn backend(operation: &str, source: impl std::fmt::Display) -> InferenceError {
        InferenceError::Backend {
            operation: operation.to_string(),
            message: source.to_string(),
        }
    }
}
