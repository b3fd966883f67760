//! Recommendation service: validate, encode, vote

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::unified_error::{RecommendError, ValidationError};
use crate::encoder::{self, Domain};
use crate::ensemble::EnsembleResult;
use crate::store::ModelContext;

/// Entry point for recommendation requests.
///
/// Cheap to clone; every clone shares the same loaded [`ModelContext`].
#[derive(Debug, Clone)]
pub struct RecommendationService {
    context: Arc<ModelContext>,
}

impl RecommendationService {
    pub fn new(context: ModelContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn from_shared(context: Arc<ModelContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ModelContext {
        &self.context
    }

    /// Domains whose models loaded at startup
    pub fn available_domains(&self) -> Vec<Domain> {
        Domain::ALL
            .into_iter()
            .filter(|d| self.context.is_available(*d))
            .collect()
    }

    pub fn is_available(&self, domain: Domain) -> bool {
        self.context.is_available(domain)
    }

    /// Run the full pipeline for one request.
    ///
    /// No classifier is invoked unless every field is present and encodes.
    pub fn recommend(
        &self,
        domain: Domain,
        fields: &HashMap<String, String>,
    ) -> Result<EnsembleResult, RecommendError> {
        let ensemble = self
            .context
            .ensemble(domain)
            .ok_or(RecommendError::ModelUnavailable { domain })?;

        if let Some(field) = encoder::first_missing_field(domain, fields) {
            return Err(ValidationError::MissingField {
                field: field.to_string(),
            }
            .into());
        }

        let vector = encoder::encode(domain, fields, self.context.registry())?;
        let result = ensemble.vote(&vector, self.context.registry())?;

        let degraded = result.degraded_roles();
        if !degraded.is_empty() {
            tracing::warn!(%domain, ?degraded, "recommendation served with degraded roles");
        }
        Ok(result)
    }

    pub fn recommend_crop(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<EnsembleResult, RecommendError> {
        self.recommend(Domain::Crop, fields)
    }

    pub fn recommend_fertilizer(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<EnsembleResult, RecommendError> {
        self.recommend(Domain::Fertilizer, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::test_models::FixedClassifier;
    use crate::classifier::ClassifierHandle;
    use crate::ensemble::Ensemble;
    use crate::labels::{LabelRegistry, Vocabulary, VocabularyKind};
    use rstest::rstest;

    fn vocab(labels: &[&str]) -> Vocabulary {
        Vocabulary::new(labels.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn crop_fields() -> HashMap<String, String> {
        [
            ("Nitrogen", "90"),
            ("Phosphorus", "42"),
            ("Potassium", "43"),
            ("Temperature", "20.8"),
            ("Humidity", "82"),
            ("pH_Value", "6.5"),
            ("Rainfall", "202.9"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn fertilizer_fields(soil: &str, crop: &str) -> HashMap<String, String> {
        [
            ("Temperature", "26"),
            ("Humidity", "52"),
            ("Moisture", "38"),
            ("Soil_Type", soil),
            ("Crop_Type", crop),
            ("Nitrogen", "37"),
            ("Potassium", "0"),
            ("Phosphorus", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn crop_service(codes: [usize; 3]) -> RecommendationService {
        let registry =
            LabelRegistry::new().with(VocabularyKind::Crop, vocab(&["maize", "rice", "jute"]));
        let members = ["xgb", "rf", "knn"]
            .iter()
            .zip(codes)
            .map(|(role, code)| {
                let model = FixedClassifier::predicting(7, 3, code);
                ClassifierHandle::new(*role, Domain::Crop, Box::new(model))
            })
            .collect();
        let ensemble = Ensemble::new(Domain::Crop, members).unwrap();
        RecommendationService::new(ModelContext::new(registry, vec![ensemble]))
    }

    fn fertilizer_service() -> RecommendationService {
        let registry = LabelRegistry::new()
            .with(VocabularyKind::Fertilizer, vocab(&["Urea", "DAP"]))
            .with(VocabularyKind::SoilType, vocab(&["Black", "Clayey"]))
            .with(VocabularyKind::CropType, vocab(&["Cotton", "Paddy"]));
        let members = ["xgb", "rf", "svm"]
            .iter()
            .map(|role| {
                // A failing model proves no classifier ran on rejected input
                let model = FixedClassifier::predicting(8, 2, 0).failing();
                ClassifierHandle::new(*role, Domain::Fertilizer, Box::new(model))
            })
            .collect();
        let ensemble = Ensemble::new(Domain::Fertilizer, members).unwrap();
        RecommendationService::new(ModelContext::new(registry, vec![ensemble]))
    }

    #[test]
    fn test_unanimous_crop_recommendation() {
        let service = crop_service([1, 1, 1]);
        let result = service.recommend_crop(&crop_fields()).unwrap();

        assert_eq!(result.final_prediction, "rice");
        for role in ["xgb", "rf", "knn"] {
            assert_eq!(result.role(role).unwrap().label.as_deref(), Some("rice"));
        }
    }

    #[test]
    fn test_two_of_three_majority() {
        let service = crop_service([1, 2, 1]);
        let result = service.recommend_crop(&crop_fields()).unwrap();
        assert_eq!(result.final_prediction, "rice");
        assert_eq!(result.role("rf").unwrap().label.as_deref(), Some("jute"));
    }

    #[rstest]
    #[case("Nitrogen")]
    #[case("Rainfall")]
    fn test_missing_crop_field(#[case] field: &str) {
        let service = crop_service([0, 0, 0]);
        let mut fields = crop_fields();
        fields.remove(field);

        let err = service.recommend_crop(&fields).unwrap_err();
        assert!(err.is_client_error());
        match err {
            RecommendError::Validation(ValidationError::MissingField { field: f }) => {
                assert_eq!(f, field)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_value_is_rejected() {
        let service = crop_service([0, 0, 0]);
        let mut fields = crop_fields();
        fields.insert("Humidity".to_string(), "wet".to_string());

        let err = service.recommend_crop(&fields).unwrap_err();
        assert!(matches!(
            err,
            RecommendError::Validation(ValidationError::InvalidNumericField { .. })
        ));
    }

    #[rstest]
    #[case("Sandy", "Maize", "Soil_Type")]
    #[case("Black", "Sugarcane", "Crop_Type")]
    fn test_unknown_category_rejected_before_inference(
        #[case] soil: &str,
        #[case] crop: &str,
        #[case] expected_field: &str,
    ) {
        let service = fertilizer_service();
        let err = service
            .recommend_fertilizer(&fertilizer_fields(soil, crop))
            .unwrap_err();

        match err {
            RecommendError::Validation(e @ ValidationError::UnknownCategory { .. }) => {
                assert_eq!(e.field(), expected_field)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unloaded_domain_is_unavailable() {
        let service = crop_service([0, 0, 0]);
        assert_eq!(service.available_domains(), vec![Domain::Crop]);

        let err = service
            .recommend_fertilizer(&fertilizer_fields("Black", "Cotton"))
            .unwrap_err();
        assert!(matches!(
            err,
            RecommendError::ModelUnavailable {
                domain: Domain::Fertilizer
            }
        ));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_clones_share_context() {
        let service = crop_service([2, 2, 0]);
        let other = service.clone();
        assert!(std::ptr::eq(service.context(), other.context()));
        assert_eq!(
            other.recommend_crop(&crop_fields()).unwrap().final_prediction,
            "jute"
        );
    }
}
