//! Classifier adapter: one contract over heterogeneous trained models
//!
//! Artifacts are JSON files exported by the Python training scripts. The
//! stored `algorithm` tag decides which variant is built at load time:
//!
//! | tag             | variant                         |
//! |-----------------|---------------------------------|
//! | `xgboost`       | [`gbt::GradientBoostedTrees`]   |
//! | `random_forest` | [`forest::RandomForest`]        |
//! | `knn`           | [`knn::KnnClassifier`]          |
//! | `svm`           | [`svm::SvmClassifier`]          |
//!
//! Any artifact may also carry a `scaler` step and a `classes` list mapping
//! the estimator's output index to a vocabulary code.
//!
//! ## Confidence policy
//! [`ClassifierHandle::predict_confidence`] is `max(distribution) * 100`
//! when the variant exposes a class distribution. Variants exported without
//! probability support report exactly `0.0`. This is degraded confidence,
//! not an error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::unified_error::{errors, ArtifactError, InferenceError};
use crate::encoder::Domain;

pub mod forest;
pub mod gbt;
pub mod knn;
pub mod svm;
pub mod tree;

pub use forest::RandomForest;
pub use gbt::GradientBoostedTrees;
pub use knn::KnnClassifier;
pub use svm::SvmClassifier;

/// Stored model kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierKind {
    #[serde(rename = "xgboost", alias = "gradient_boosting")]
    GradientBoosting,
    #[serde(rename = "random_forest")]
    RandomForest,
    #[serde(rename = "knn")]
    NearestNeighbors,
    #[serde(rename = "svm")]
    SupportVector,
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassifierKind::GradientBoosting => "xgboost",
            ClassifierKind::RandomForest => "random_forest",
            ClassifierKind::NearestNeighbors => "knn",
            ClassifierKind::SupportVector => "svm",
        };
        f.write_str(name)
    }
}

/// Capability set every variant implements.
///
/// Inputs are already scaled and have exactly [`Classifier::num_features`] values.
pub trait Classifier: Send + Sync + fmt::Debug {
    fn kind(&self) -> ClassifierKind;

    fn num_features(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Index of the predicted class in the estimator's own class list
    fn predict_index(&self, x: &[f64]) -> Result<usize, InferenceError>;

    /// Class distribution, `None` when the variant has no probability support
    fn predict_proba(&self, x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError>;

    /// Predicted index and distribution together. Variants override this to
    /// walk the model once; the result must equal the two separate calls.
    fn predict_with_proba(&self, x: &[f64]) -> Result<(usize, Option<Vec<f64>>), InferenceError> {
        Ok((self.predict_index(x)?, self.predict_proba(x)?))
    }
}

/// `(x - mean) / scale` preprocessing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn validate(&self, num_features: usize) -> Result<(), ArtifactError> {
        if self.mean.len() != num_features || self.scale.len() != num_features {
            return Err(errors::invalid_artifact(format!(
                "scaler has {}/{} entries, expected {}",
                self.mean.len(),
                self.scale.len(),
                num_features
            )));
        }
        if self.scale.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(errors::invalid_artifact("scaler contains a zero or non-finite scale"));
        }
        Ok(())
    }

    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactHeader {
    algorithm: ClassifierKind,
    #[serde(default)]
    classes: Option<Vec<usize>>,
    #[serde(default)]
    scaler: Option<StandardScaler>,
}

/// A loaded model bound to its ensemble role. Read-only, shared across requests.
#[derive(Debug)]
pub struct ClassifierHandle {
    role: String,
    domain: Domain,
    classes: Vec<usize>,
    scaler: Option<StandardScaler>,
    model: Box<dyn Classifier>,
}

impl ClassifierHandle {
    /// Wrap an already-built model with an identity class map and no scaler
    pub fn new(role: impl Into<String>, domain: Domain, model: Box<dyn Classifier>) -> Self {
        let classes = (0..model.num_classes()).collect();
        Self {
            role: role.into(),
            domain,
            classes,
            scaler: None,
            model,
        }
    }

    /// Parse an exported artifact, choosing the variant from its `algorithm` tag
    pub fn from_json(
        role: impl Into<String>,
        domain: Domain,
        json: &str,
    ) -> Result<Self, ArtifactError> {
        let header: ArtifactHeader = serde_json::from_str(json)?;

        let model: Box<dyn Classifier> = match header.algorithm {
            ClassifierKind::GradientBoosting => Box::new(GradientBoostedTrees::from_json(json)?),
            ClassifierKind::RandomForest => Box::new(RandomForest::from_json(json)?),
            ClassifierKind::NearestNeighbors => Box::new(KnnClassifier::from_json(json)?),
            ClassifierKind::SupportVector => Box::new(SvmClassifier::from_json(json)?),
        };

        let classes = match header.classes {
            Some(classes) if classes.len() != model.num_classes() => {
                return Err(errors::invalid_artifact(format!(
                    "classes lists {} codes but the model has {} classes",
                    classes.len(),
                    model.num_classes()
                )));
            }
            Some(classes) => classes,
            None => (0..model.num_classes()).collect(),
        };

        if let Some(scaler) = &header.scaler {
            scaler.validate(model.num_features())?;
        }

        Ok(Self {
            role: role.into(),
            domain,
            classes,
            scaler: header.scaler,
            model,
        })
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn kind(&self) -> ClassifierKind {
        self.model.kind()
    }

    pub fn num_features(&self) -> usize {
        self.model.num_features()
    }

    /// Largest vocabulary code this handle can emit
    pub fn max_label_code(&self) -> Option<usize> {
        self.classes.iter().copied().max()
    }

    fn prepare(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if x.len() != self.model.num_features() {
            return Err(InferenceError::DimensionMismatch {
                expected: self.model.num_features(),
                actual: x.len(),
            });
        }
        Ok(match &self.scaler {
            Some(scaler) => scaler.transform(x),
            None => x.to_vec(),
        })
    }

    /// Predicted vocabulary code
    pub fn predict_label_code(&self, x: &[f64]) -> Result<usize, InferenceError> {
        let x = self.prepare(x)?;
        let index = self.model.predict_index(&x)?;
        self.code_for(index)
    }

    /// Confidence in `[0, 100]`; `0.0` when the variant has no probability support
    pub fn predict_confidence(&self, x: &[f64]) -> Result<f64, InferenceError> {
        let x = self.prepare(x)?;
        let proba = self.model.predict_proba(&x)?;
        confidence_from(proba.as_deref())
    }

    /// Label code and confidence from one prepared input
    pub fn predict(&self, x: &[f64]) -> Result<(usize, f64), InferenceError> {
        let x = self.prepare(x)?;
        let (index, proba) = self.model.predict_with_proba(&x)?;
        let code = self.code_for(index)?;
        let confidence = confidence_from(proba.as_deref())?;
        Ok((code, confidence))
    }

    fn code_for(&self, index: usize) -> Result<usize, InferenceError> {
        self.classes
            .get(index)
            .copied()
            .ok_or(InferenceError::ClassOutOfRange {
                index,
                num_classes: self.classes.len(),
            })
    }
}

fn confidence_from(proba: Option<&[f64]>) -> Result<f64, InferenceError> {
    let Some(proba) = proba else {
        return Ok(0.0);
    };
    if proba.iter().any(|p| !p.is_finite()) {
        return Err(InferenceError::NonFinite {
            what: "class probability",
        });
    }
    let max = proba.iter().copied().fold(0.0_f64, f64::max);
    Ok((max * 100.0).clamp(0.0, 100.0))
}

/// Index of the first maximum. Ties resolve to the lowest index.
pub(crate) fn argmax(values: &[f64]) -> Result<usize, InferenceError> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(InferenceError::NonFinite { what: "class score" });
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i).ok_or(InferenceError::ClassOutOfRange {
        index: 0,
        num_classes: 0,
    })
}

#[cfg(test)]
pub(crate) mod test_models {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts how often the model itself is evaluated
    #[derive(Debug, Default)]
    pub struct CountingClassifier {
        pub evaluations: Arc<AtomicUsize>,
    }

    impl CountingClassifier {
        fn evaluate(&self) -> Vec<f64> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            vec![0.25, 0.75]
        }
    }

    impl Classifier for CountingClassifier {
        fn kind(&self) -> ClassifierKind {
            ClassifierKind::RandomForest
        }

        fn num_features(&self) -> usize {
            1
        }

        fn num_classes(&self) -> usize {
            2
        }

        fn predict_index(&self, _x: &[f64]) -> Result<usize, InferenceError> {
            argmax(&self.evaluate())
        }

        fn predict_proba(&self, _x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
            Ok(Some(self.evaluate()))
        }

        fn predict_with_proba(
            &self,
            _x: &[f64],
        ) -> Result<(usize, Option<Vec<f64>>), InferenceError> {
            let proba = self.evaluate();
            Ok((argmax(&proba)?, Some(proba)))
        }
    }

    /// Fixed-output model for voter and service tests
    #[derive(Debug)]
    pub struct FixedClassifier {
        pub num_features: usize,
        pub num_classes: usize,
        pub index: usize,
        pub proba: Option<Vec<f64>>,
        pub fail: bool,
    }

    impl FixedClassifier {
        pub fn predicting(num_features: usize, num_classes: usize, index: usize) -> Self {
            let mut proba = vec![0.0; num_classes];
            proba[index] = 1.0;
            Self {
                num_features,
                num_classes,
                index,
                proba: Some(proba),
                fail: false,
            }
        }

        pub fn without_proba(mut self) -> Self {
            self.proba = None;
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Classifier for FixedClassifier {
        fn kind(&self) -> ClassifierKind {
            ClassifierKind::GradientBoosting
        }

        fn num_features(&self) -> usize {
            self.num_features
        }

        fn num_classes(&self) -> usize {
            self.num_classes
        }

        fn predict_index(&self, _x: &[f64]) -> Result<usize, InferenceError> {
            if self.fail {
                return Err(errors::backend("predict", "forced failure"));
            }
            Ok(self.index)
        }

        fn predict_proba(&self, _x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
            if self.fail {
                return Err(errors::backend("predict_proba", "forced failure"));
            }
            Ok(self.proba.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_models::FixedClassifier;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]).unwrap(), 1);
        assert_eq!(argmax(&[1.0]).unwrap(), 0);
        assert!(argmax(&[0.1, f64::NAN]).is_err());
        assert!(argmax(&[]).is_err());
    }

    #[test]
    fn test_confidence_is_max_probability_percent() {
        let handle = ClassifierHandle::new(
            "rf",
            Domain::Crop,
            Box::new(FixedClassifier {
                num_features: 2,
                num_classes: 3,
                index: 1,
                proba: Some(vec![0.1, 0.7, 0.2]),
                fail: false,
            }),
        );
        let confidence = handle.predict_confidence(&[0.0, 0.0]).unwrap();
        assert!((confidence - 70.0).abs() < 1e-9);
        assert_eq!(handle.predict_label_code(&[0.0, 0.0]).unwrap(), 1);
    }

    #[test]
    fn test_missing_probability_support_yields_zero() {
        let handle = ClassifierHandle::new(
            "knn",
            Domain::Crop,
            Box::new(FixedClassifier::predicting(2, 3, 2).without_proba()),
        );
        assert_eq!(handle.predict_confidence(&[1.0, 2.0]).unwrap(), 0.0);
        assert_eq!(handle.predict(&[1.0, 2.0]).unwrap(), (2, 0.0));
    }

    #[test]
    fn test_predict_evaluates_model_once() {
        let model = test_models::CountingClassifier::default();
        let evaluations = Arc::clone(&model.evaluations);
        let handle = ClassifierHandle::new("rf", Domain::Crop, Box::new(model));

        let (code, confidence) = handle.predict(&[0.0]).unwrap();
        assert_eq!(code, 1);
        assert!((confidence - 75.0).abs() < 1e-9);
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_inference_error() {
        let handle = ClassifierHandle::new(
            "xgb",
            Domain::Crop,
            Box::new(FixedClassifier::predicting(7, 3, 0)),
        );
        let err = handle.predict_label_code(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            InferenceError::DimensionMismatch {
                expected: 7,
                actual: 2
            }
        );
    }

    #[test]
    fn test_artifact_dispatch_uses_algorithm_tag() {
        let json = r#"{
            "algorithm": "knn",
            "num_classes": 2,
            "k": 1,
            "points": [[0.0, 0.0], [10.0, 10.0]],
            "labels": [0, 1],
            "classes": [4, 9]
        }"#;
        let handle = ClassifierHandle::from_json("knn", Domain::Crop, json).unwrap();
        assert_eq!(handle.kind(), ClassifierKind::NearestNeighbors);
        assert_eq!(handle.num_features(), 2);
        assert_eq!(handle.predict_label_code(&[9.0, 9.5]).unwrap(), 9);
    }

    #[test]
    fn test_scaler_applied_before_estimator() {
        let json = r#"{
            "algorithm": "knn",
            "num_classes": 2,
            "k": 1,
            "points": [[0.0], [1.0]],
            "labels": [0, 1],
            "scaler": {"mean": [100.0], "scale": [50.0]}
        }"#;
        let handle = ClassifierHandle::from_json("knn", Domain::Crop, json).unwrap();
        // (145 - 100) / 50 = 0.9 -> nearest point is 1.0
        assert_eq!(handle.predict_label_code(&[145.0]).unwrap(), 1);
        assert_eq!(handle.predict_label_code(&[110.0]).unwrap(), 0);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let json = r#"{"algorithm": "naive_bayes", "num_classes": 2}"#;
        assert!(ClassifierHandle::from_json("nb", Domain::Crop, json).is_err());
    }

    #[test]
    fn test_class_map_length_checked() {
        let json = r#"{
            "algorithm": "knn",
            "num_classes": 2,
            "k": 1,
            "points": [[0.0], [1.0]],
            "labels": [0, 1],
            "classes": [0, 1, 2]
        }"#;
        assert!(ClassifierHandle::from_json("knn", Domain::Crop, json).is_err());
    }
}
