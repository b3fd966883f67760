//! Ensemble voter
//!
//! Runs every role of a domain on the same feature vector, decodes the
//! predicted codes, and picks the most frequent label. Ties go to the label
//! produced by the earliest role in canonical order, unless the ensemble is
//! configured for [`TieBreak::Lexicographic`].
//!
//! A role that fails inference is logged and reported as degraded. The
//! request fails only when fewer than a strict majority of roles produced a
//! label.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierHandle;
use crate::core::unified_error::{InferenceError, ModelLoadError, RecommendError};
use crate::encoder::{Domain, FeatureVector};
use crate::labels::LabelRegistry;

/// Rule for choosing among labels tied for the highest vote count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Label of the earliest role among the tied labels
    #[default]
    FirstRole,
    /// Smallest label in string order
    Lexicographic,
}

/// Outcome of one role
#[derive(Debug, Clone, PartialEq)]
pub struct RolePrediction {
    pub role: String,
    /// `None` when the role failed inference
    pub label: Option<String>,
    /// Percentage in `[0, 100]`; `0.0` for degraded roles or no probability support
    pub confidence: f64,
    pub error: Option<InferenceError>,
}

impl RolePrediction {
    pub fn is_degraded(&self) -> bool {
        self.label.is_none()
    }
}

/// Per-role results plus the aggregated label
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    pub domain: Domain,
    pub roles: Vec<RolePrediction>,
    pub final_prediction: String,
}

impl EnsembleResult {
    pub fn role(&self, role: &str) -> Option<&RolePrediction> {
        self.roles.iter().find(|r| r.role == role)
    }

    pub fn degraded_roles(&self) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|r| r.is_degraded())
            .map(|r| r.role.as_str())
            .collect()
    }
}

/// Response keys written next to the per-role labels
pub const RESERVED_KEYS: [&str; 3] = ["final_prediction", "probabilities", "degraded"];

/// Role names become response keys, so they must be unique and must not
/// shadow [`RESERVED_KEYS`]
pub fn check_role_names<'a, I>(domain: Domain, roles: I) -> Result<(), ModelLoadError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for role in roles {
        if RESERVED_KEYS.contains(&role) {
            return Err(ModelLoadError::ReservedRoleName {
                domain,
                role: role.to_string(),
            });
        }
        if !seen.insert(role) {
            return Err(ModelLoadError::DuplicateRole {
                domain,
                role: role.to_string(),
            });
        }
    }
    Ok(())
}

struct Probabilities<'a>(&'a [RolePrediction]);

impl Serialize for Probabilities<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for r in self.0 {
            map.serialize_entry(&r.role, &r.confidence)?;
        }
        map.end()
    }
}

/// `{"<role>": label, ..., "final_prediction": ..., "probabilities": {...}}`
impl Serialize for EnsembleResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let degraded = self.degraded_roles();
        let mut map = serializer.serialize_map(None)?;
        for r in &self.roles {
            map.serialize_entry(&r.role, &r.label)?;
        }
        map.serialize_entry("final_prediction", &self.final_prediction)?;
        map.serialize_entry("probabilities", &Probabilities(&self.roles))?;
        if !degraded.is_empty() {
            map.serialize_entry("degraded", &degraded)?;
        }
        map.end()
    }
}

/// Most frequent label. `labels` must be in canonical role order.
pub fn majority_vote<'a, I>(labels: I, tie_break: TieBreak) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    // (label, count) in first-seen order
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(l, _)| *l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label, 1)),
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for (label, n) in counts {
        best = match best {
            None => Some((label, n)),
            Some((_, bn)) if n > bn => Some((label, n)),
            Some((b, bn)) if n == bn && tie_break == TieBreak::Lexicographic && label < b => {
                Some((label, n))
            }
            keep => keep,
        };
    }
    best.map(|(label, _)| label)
}

/// Ordered set of classifier roles serving one domain
#[derive(Debug)]
pub struct Ensemble {
    domain: Domain,
    members: Vec<ClassifierHandle>,
    tie_break: TieBreak,
    parallel: bool,
}

impl Ensemble {
    pub fn new(domain: Domain, members: Vec<ClassifierHandle>) -> Result<Self, ModelLoadError> {
        if members.is_empty() {
            return Err(ModelLoadError::EmptyEnsemble { domain });
        }
        check_role_names(domain, members.iter().map(ClassifierHandle::role))?;
        Ok(Self {
            domain,
            members,
            tie_break: TieBreak::default(),
            parallel: true,
        })
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Run roles on the rayon pool (default) or one after another
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(ClassifierHandle::role)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn vote(
        &self,
        vector: &FeatureVector,
        registry: &LabelRegistry,
    ) -> Result<EnsembleResult, RecommendError> {
        let x = vector.as_slice();
        let roles: Vec<RolePrediction> = if self.parallel {
            self.members
                .par_iter()
                .map(|m| self.run_member(m, x, registry))
                .collect()
        } else {
            self.members
                .iter()
                .map(|m| self.run_member(m, x, registry))
                .collect()
        };

        let total = roles.len();
        let succeeded = roles.iter().filter(|r| !r.is_degraded()).count();
        if succeeded == 0 {
            let first = &roles[0];
            return Err(RecommendError::Inference {
                role: first.role.clone(),
                source: first
                    .error
                    .clone()
                    .unwrap_or(InferenceError::ClassOutOfRange {
                        index: 0,
                        num_classes: 0,
                    }),
            });
        }
        if succeeded * 2 <= total {
            return Err(RecommendError::NoMajority { succeeded, total });
        }

        let final_prediction =
            majority_vote(roles.iter().filter_map(|r| r.label.as_deref()), self.tie_break)
                .map(str::to_string)
                .ok_or(RecommendError::NoMajority { succeeded, total })?;

        tracing::debug!(
            domain = %self.domain,
            final_prediction = %final_prediction,
            succeeded,
            total,
            "ensemble vote complete"
        );

        Ok(EnsembleResult {
            domain: self.domain,
            roles,
            final_prediction,
        })
    }

    fn run_member(
        &self,
        member: &ClassifierHandle,
        x: &[f64],
        registry: &LabelRegistry,
    ) -> RolePrediction {
        let vocabulary = self.domain.target_vocabulary();
        let outcome = member.predict(x).and_then(|(code, confidence)| {
            registry
                .decode(vocabulary, code)
                .map(|label| (label.to_string(), confidence))
                .ok_or(InferenceError::UnknownLabelCode {
                    code,
                    vocabulary: vocabulary.to_string(),
                })
        });

        match outcome {
            Ok((label, confidence)) => RolePrediction {
                role: member.role().to_string(),
                label: Some(label),
                confidence,
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    domain = %self.domain,
                    role = member.role(),
                    kind = %member.kind(),
                    error = %e,
                    "classifier inference failed, role degraded"
                );
                RolePrediction {
                    role: member.role().to_string(),
                    label: None,
                    confidence: 0.0,
                    error: Some(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_models::FixedClassifier;
    use crate::encoder;
    use crate::labels::{Vocabulary, VocabularyKind};
    use rstest::*;
    use std::collections::HashMap;

    fn registry() -> LabelRegistry {
        LabelRegistry::new().with(
            VocabularyKind::Crop,
            Vocabulary::from_json(r#"["apple", "banana", "maize", "rice"]"#).unwrap(),
        )
    }

    fn crop_vector() -> FeatureVector {
        let fields: HashMap<String, String> = [
            ("Nitrogen", "90"),
            ("Phosphorus", "42"),
            ("Potassium", "43"),
            ("Temperature", "20.8"),
            ("Humidity", "82"),
            ("pH_Value", "6.5"),
            ("Rainfall", "202.9"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        encoder::encode(Domain::Crop, &fields, &registry()).unwrap()
    }

    fn member(role: &str, model: FixedClassifier) -> ClassifierHandle {
        ClassifierHandle::new(role, Domain::Crop, Box::new(model))
    }

    fn ensemble(indices: [usize; 3]) -> Ensemble {
        let roles = ["xgb", "rf", "knn"];
        let members = roles
            .iter()
            .zip(indices)
            .map(|(role, i)| member(role, FixedClassifier::predicting(7, 4, i)))
            .collect();
        Ensemble::new(Domain::Crop, members).unwrap()
    }

    #[rstest]
    #[case(vec!["A", "A", "B"], "A")]
    #[case(vec!["B", "A", "A"], "A")]
    #[case(vec!["A", "B", "C"], "A")]
    #[case(vec!["C", "B", "A"], "C")]
    #[case(vec!["B", "A"], "B")]
    fn test_majority_vote_first_role(#[case] labels: Vec<&str>, #[case] expected: &str) {
        for _ in 0..10 {
            assert_eq!(
                majority_vote(labels.iter().copied(), TieBreak::FirstRole),
                Some(expected)
            );
        }
    }

    #[rstest]
    #[case(vec!["C", "B", "A"], "A")]
    #[case(vec!["B", "B", "A"], "B")]
    #[case(vec!["rice", "maize"], "maize")]
    fn test_majority_vote_lexicographic(#[case] labels: Vec<&str>, #[case] expected: &str) {
        assert_eq!(
            majority_vote(labels.iter().copied(), TieBreak::Lexicographic),
            Some(expected)
        );
    }

    #[test]
    fn test_majority_vote_empty() {
        assert_eq!(majority_vote(std::iter::empty(), TieBreak::FirstRole), None);
    }

    #[test]
    fn test_all_roles_agree() {
        let result = ensemble([3, 3, 3]).vote(&crop_vector(), &registry()).unwrap();
        assert_eq!(result.final_prediction, "rice");
        assert_eq!(result.roles.len(), 3);
        for r in &result.roles {
            assert_eq!(r.label.as_deref(), Some("rice"));
            assert_eq!(r.confidence, 100.0);
        }
        assert!(result.degraded_roles().is_empty());
    }

    #[test]
    fn test_all_distinct_first_role_wins() {
        for parallel in [true, false] {
            let result = ensemble([2, 0, 1])
                .with_parallel(parallel)
                .vote(&crop_vector(), &registry())
                .unwrap();
            assert_eq!(result.final_prediction, "maize");
            let roles: Vec<&str> = result.roles.iter().map(|r| r.role.as_str()).collect();
            assert_eq!(roles, vec!["xgb", "rf", "knn"]);
        }
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let result = ensemble([2, 0, 1])
            .with_tie_break(TieBreak::Lexicographic)
            .vote(&crop_vector(), &registry())
            .unwrap();
        assert_eq!(result.final_prediction, "apple");
    }

    #[test]
    fn test_one_failing_role_degrades() {
        let members = vec![
            member("xgb", FixedClassifier::predicting(7, 4, 1)),
            member("rf", FixedClassifier::predicting(7, 4, 3).failing()),
            member("knn", FixedClassifier::predicting(7, 4, 3).without_proba()),
        ];
        let result = Ensemble::new(Domain::Crop, members)
            .unwrap()
            .vote(&crop_vector(), &registry())
            .unwrap();

        // Remaining {banana, rice} tie, xgb is first
        assert_eq!(result.final_prediction, "banana");
        assert_eq!(result.degraded_roles(), vec!["rf"]);
        let rf = result.role("rf").unwrap();
        assert_eq!(rf.confidence, 0.0);
        assert!(rf.error.is_some());
        assert_eq!(result.role("knn").unwrap().confidence, 0.0);
    }

    #[test]
    fn test_majority_lost_is_server_error() {
        let members = vec![
            member("xgb", FixedClassifier::predicting(7, 4, 1)),
            member("rf", FixedClassifier::predicting(7, 4, 3).failing()),
            member("knn", FixedClassifier::predicting(7, 4, 3).failing()),
        ];
        let err = Ensemble::new(Domain::Crop, members)
            .unwrap()
            .vote(&crop_vector(), &registry())
            .unwrap_err();
        assert!(matches!(
            err,
            RecommendError::NoMajority {
                succeeded: 1,
                total: 3
            }
        ));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_all_failed_reports_first_role() {
        let members = vec![
            member("xgb", FixedClassifier::predicting(7, 4, 1).failing()),
            member("rf", FixedClassifier::predicting(7, 4, 3).failing()),
        ];
        let err = Ensemble::new(Domain::Crop, members)
            .unwrap()
            .vote(&crop_vector(), &registry())
            .unwrap_err();
        assert!(matches!(err, RecommendError::Inference { ref role, .. } if role == "xgb"));
    }

    #[test]
    fn test_code_outside_vocabulary_degrades_role() {
        let members = vec![
            member("xgb", FixedClassifier::predicting(7, 6, 5)),
            member("rf", FixedClassifier::predicting(7, 4, 3)),
            member("knn", FixedClassifier::predicting(7, 4, 3)),
        ];
        let result = Ensemble::new(Domain::Crop, members)
            .unwrap()
            .vote(&crop_vector(), &registry())
            .unwrap();
        assert_eq!(result.final_prediction, "rice");
        assert!(matches!(
            result.role("xgb").unwrap().error,
            Some(InferenceError::UnknownLabelCode { code: 5, .. })
        ));
    }

    #[test]
    fn test_response_shape() {
        let result = ensemble([3, 3, 1]).vote(&crop_vector(), &registry()).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["xgb"], "rice");
        assert_eq!(json["knn"], "banana");
        assert_eq!(json["final_prediction"], "rice");
        assert_eq!(json["probabilities"]["rf"], 100.0);
        assert!(json.get("degraded").is_none());
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        assert!(Ensemble::new(Domain::Crop, Vec::new()).is_err());
    }

    #[rstest]
    #[case(&["xgb", "rf", "xgb"], "xgb")]
    #[case(&["rf", "rf"], "rf")]
    fn test_repeated_role_rejected(#[case] roles: &[&str], #[case] repeated: &str) {
        let members = roles
            .iter()
            .map(|role| member(role, FixedClassifier::predicting(7, 4, 0)))
            .collect();
        let err = Ensemble::new(Domain::Crop, members).unwrap_err();
        assert!(
            matches!(err, ModelLoadError::DuplicateRole { ref role, .. } if role == repeated),
            "{err:?}"
        );
    }

    #[rstest]
    #[case("final_prediction")]
    #[case("probabilities")]
    #[case("degraded")]
    fn test_role_shadowing_response_key_rejected(#[case] name: &str) {
        let err = check_role_names(Domain::Fertilizer, ["xgb", name]).unwrap_err();
        assert!(matches!(err, ModelLoadError::ReservedRoleName { .. }));
        assert!(check_role_names(Domain::Fertilizer, ["xgb", "rf", "svm"]).is_ok());
    }
}
