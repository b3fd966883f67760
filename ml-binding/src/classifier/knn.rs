//! KNN (K-Nearest Neighbors) classifier using Linfa
//!
//! Inference-only implementation. Training is done in Python (scikit-learn
//! `KNeighborsClassifier`); the fitted training points and their class
//! indices are exported to JSON.
//!
//! Neighbour search uses linfa-nn's Ball Tree. Votes are `uniform` or
//! weighted by inverse `distance`, matching scikit-learn's `weights` option.
//! Artifacts exported with `"probability": false` expose no distribution.

use linfa_nn::{distance::L2Dist, BallTree, NearestNeighbour};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{argmax, Classifier, ClassifierKind};
use crate::core::unified_error::{errors, ArtifactError, InferenceError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnnWeights {
    #[default]
    Uniform,
    Distance,
}

/// Model data for JSON deserialization
#[derive(Debug, Serialize, Deserialize)]
pub struct KnnModelData {
    pub num_classes: usize,
    pub k: usize,
    pub points: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    #[serde(default)]
    pub weights: KnnWeights,
    #[serde(default = "default_probability")]
    pub probability: bool,
}

fn default_probability() -> bool {
    true
}

/// KNN classifier over the exported training set
#[derive(Debug)]
pub struct KnnClassifier {
    k: usize,
    num_classes: usize,
    points: Array2<f64>,
    labels: Vec<usize>,
    weights: KnnWeights,
    probability: bool,
}

impl KnnClassifier {
    /// Load model from JSON
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let data: KnnModelData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn from_data(data: KnnModelData) -> Result<Self, ArtifactError> {
        if data.points.is_empty() {
            return Err(errors::invalid_artifact("KNN model has no training points"));
        }
        if data.points.len() != data.labels.len() {
            return Err(errors::invalid_artifact(format!(
                "{} points but {} labels",
                data.points.len(),
                data.labels.len()
            )));
        }
        if data.k == 0 {
            return Err(errors::invalid_artifact("k must be at least 1"));
        }
        if let Some(label) = data.labels.iter().find(|l| **l >= data.num_classes) {
            return Err(errors::invalid_artifact(format!(
                "label {} out of range for {} classes",
                label, data.num_classes
            )));
        }

        let n = data.points.len();
        let dim = data.points[0].len();
        if dim == 0 || data.points.iter().any(|p| p.len() != dim) {
            return Err(errors::invalid_artifact("training points have inconsistent dimensions"));
        }
        let flat: Vec<f64> = data.points.into_iter().flatten().collect();
        let points = Array2::from_shape_vec((n, dim), flat)
            .map_err(|e| errors::invalid_artifact(format!("Failed to restore points: {}", e)))?;

        Ok(Self {
            k: data.k,
            num_classes: data.num_classes,
            points,
            labels: data.labels,
            weights: data.weights,
            probability: data.probability,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Per-class vote weights among the k nearest training points
    fn votes(&self, query: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let ball_tree = BallTree::new()
            .from_batch(&self.points, L2Dist)
            .map_err(|e| errors::backend("build Ball Tree", e))?;

        let query_arr = Array1::from_vec(query.to_vec());
        let k = self.k.min(self.labels.len());
        let neighbors = ball_tree
            .k_nearest(query_arr.view(), k)
            .map_err(|e| errors::backend("KNN search", e))?;

        let mut votes = vec![0.0; self.num_classes];
        match self.weights {
            KnnWeights::Uniform => {
                for (_point, idx) in &neighbors {
                    votes[self.labels[*idx]] += 1.0;
                }
            }
            KnnWeights::Distance => {
                let distances: Vec<f64> = neighbors
                    .iter()
                    .map(|(point, _)| {
                        point
                            .iter()
                            .zip(query)
                            .map(|(a, b)| (a - b) * (a - b))
                            .sum::<f64>()
                            .sqrt()
                    })
                    .collect();
                // Exact matches take all the weight
                let exact = distances.iter().any(|d| *d == 0.0);
                for ((_point, idx), d) in neighbors.iter().zip(&distances) {
                    let w = match (exact, *d == 0.0) {
                        (true, true) => 1.0,
                        (true, false) => 0.0,
                        (false, _) => 1.0 / d,
                    };
                    votes[self.labels[*idx]] += w;
                }
            }
        }
        Ok(votes)
    }
}

fn normalise(votes: Vec<f64>) -> Result<Vec<f64>, InferenceError> {
    let total: f64 = votes.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(InferenceError::NonFinite { what: "vote total" });
    }
    Ok(votes.into_iter().map(|v| v / total).collect())
}

impl Classifier for KnnClassifier {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::NearestNeighbors
    }

    fn num_features(&self) -> usize {
        self.points.ncols()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict_index(&self, x: &[f64]) -> Result<usize, InferenceError> {
        argmax(&self.votes(x)?)
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
        if !self.probability {
            return Ok(None);
        }
        normalise(self.votes(x)?).map(Some)
    }

    /// One neighbour search serves both the label and the distribution
    fn predict_with_proba(&self, x: &[f64]) -> Result<(usize, Option<Vec<f64>>), InferenceError> {
        let votes = self.votes(x)?;
        let index = argmax(&votes)?;
        let proba = if self.probability {
            Some(normalise(votes)?)
        } else {
            None
        };
        Ok((index, proba))
    }
}
