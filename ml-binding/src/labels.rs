//! Label registry: code <-> display-name vocabularies
//!
//! Vocabularies are exported by the training scripts as JSON arrays of
//! strings where the array index is the label-encoder code.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::unified_error::{errors, ArtifactError, ValidationError};

/// Which categorical vocabulary a code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyKind {
    /// Crop recommendation targets
    Crop,
    /// Fertilizer recommendation targets
    Fertilizer,
    /// `Soil_Type` input feature
    SoilType,
    /// `Crop_Type` input feature
    CropType,
}

impl fmt::Display for VocabularyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VocabularyKind::Crop => "crop",
            VocabularyKind::Fertilizer => "fertilizer",
            VocabularyKind::SoilType => "soil type",
            VocabularyKind::CropType => "crop type",
        };
        f.write_str(name)
    }
}

/// Dense bijection between codes `0..N` and unique display strings
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Build from labels in code order, rejecting duplicates
    pub fn new(labels: Vec<String>) -> Result<Self, ArtifactError> {
        let mut index = HashMap::with_capacity(labels.len());
        for (code, label) in labels.iter().enumerate() {
            if index.insert(label.clone(), code).is_some() {
                return Err(errors::invalid_artifact(format!(
                    "duplicate vocabulary entry '{}'",
                    label
                )));
            }
        }
        Ok(Self { labels, index })
    }

    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let labels: Vec<String> = serde_json::from_str(json)?;
        Self::new(labels)
    }

    pub fn code_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn label_of(&self, code: usize) -> Option<&str> {
        self.labels.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// All vocabularies loaded at startup. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    vocabularies: HashMap<VocabularyKind, Vocabulary>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used while the model store assembles the registry
    pub fn with(mut self, kind: VocabularyKind, vocabulary: Vocabulary) -> Self {
        self.vocabularies.insert(kind, vocabulary);
        self
    }

    pub fn vocabulary(&self, kind: VocabularyKind) -> Option<&Vocabulary> {
        self.vocabularies.get(&kind)
    }

    pub fn contains(&self, kind: VocabularyKind) -> bool {
        self.vocabularies.contains_key(&kind)
    }

    /// Encode a display string. `field` is the request field name used in the error.
    pub fn encode(
        &self,
        kind: VocabularyKind,
        field: &str,
        value: &str,
    ) -> Result<usize, ValidationError> {
        self.vocabulary(kind)
            .and_then(|v| v.code_of(value))
            .ok_or_else(|| ValidationError::UnknownCategory {
                field: field.to_string(),
                value: value.to_string(),
            })
    }

    /// Decode a classifier-produced code back to its display string
    pub fn decode(&self, kind: VocabularyKind, code: usize) -> Option<&str> {
        self.vocabulary(kind).and_then(|v| v.label_of(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soil_types() -> Vocabulary {
        Vocabulary::from_json(r#"["Black", "Clayey", "Loamy", "Red", "Sandy"]"#).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let registry = LabelRegistry::new().with(VocabularyKind::SoilType, soil_types());
        let vocab = registry.vocabulary(VocabularyKind::SoilType).unwrap();

        for label in vocab.labels() {
            let code = registry
                .encode(VocabularyKind::SoilType, "Soil_Type", label)
                .unwrap();
            assert_eq!(
                registry.decode(VocabularyKind::SoilType, code),
                Some(label.as_str())
            );
        }
    }

    #[test]
    fn test_codes_follow_array_order() {
        let vocab = soil_types();
        assert_eq!(vocab.code_of("Black"), Some(0));
        assert_eq!(vocab.code_of("Sandy"), Some(4));
        assert_eq!(vocab.len(), 5);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let registry = LabelRegistry::new().with(VocabularyKind::SoilType, soil_types());
        let err = registry
            .encode(VocabularyKind::SoilType, "Soil_Type", "Peaty")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownCategory {
                field: "Soil_Type".to_string(),
                value: "Peaty".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_vocabulary_encodes_as_unknown() {
        let registry = LabelRegistry::new();
        assert!(registry
            .encode(VocabularyKind::CropType, "Crop_Type", "Maize")
            .is_err());
        assert_eq!(registry.decode(VocabularyKind::Crop, 0), None);
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let result = Vocabulary::from_json(r#"["rice", "maize", "rice"]"#);
        assert!(matches!(result, Err(ArtifactError::Invalid(_))));
    }

    #[test]
    fn test_out_of_range_decode() {
        let registry = LabelRegistry::new().with(VocabularyKind::SoilType, soil_types());
        assert_eq!(registry.decode(VocabularyKind::SoilType, 5), None);
    }
}
