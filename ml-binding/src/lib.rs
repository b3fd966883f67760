//! Crop and fertilizer recommendation engine
//!
//! Inference-only library that turns soil and climate measurements into a
//! recommendation by majority vote over an ensemble of pre-trained classifiers.
//!
//! ## Architecture
//! - **Training**: Done offline in Python with scikit-learn / XGBoost, then exported to JSON
//! - **Inference**: Done in Rust, served over HTTP by `agri-api-server` or via the C ABI in [`ffi`]
//!
//! ## Pipeline
//! 1. [`encoder`] validates request fields and builds the domain's feature vector,
//!    mapping categorical values through the [`labels`] registry
//! 2. [`ensemble`] runs every configured [`classifier`] role on that vector
//! 3. Predicted codes are decoded back to display labels and the most frequent wins
//!
//! ## Algorithms
//! - Gradient boosted trees (XGBoost dump)
//! - Random forest
//! - KNN: Ball Tree neighbour lookup via linfa-nn
//! - SVM: Linear or RBF kernel, one-vs-rest or pairwise (one-vs-one) decision
//!   functions, with optional Platt scaling
//!
//! Models and vocabularies are loaded once at startup by [`store`].

pub mod classifier;
pub mod config;
pub mod core;
pub mod encoder;
pub mod ensemble;
pub mod ffi;
pub mod labels;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use crate::classifier::{Classifier, ClassifierHandle, ClassifierKind};
pub use crate::config::RecommenderConfig;
pub use crate::core::unified_error::{
    ConfigError, InferenceError, ModelLoadError, RecommendError, ValidationError,
};
pub use crate::encoder::{fields_from_json, Domain, FeatureVector};
pub use crate::ensemble::{Ensemble, EnsembleResult, RolePrediction, TieBreak};
pub use crate::labels::{LabelRegistry, Vocabulary, VocabularyKind};
pub use crate::service::RecommendationService;
pub use crate::store::ModelContext;
