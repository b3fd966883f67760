//! Random forest (scikit-learn export)
//!
//! Leaves hold per-class sample counts or fractions. Each tree's leaf is
//! normalised and the forest distribution is the mean over trees.

use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, SplitRule, TreeData};
use super::{argmax, Classifier, ClassifierKind};
use crate::core::unified_error::{errors, ArtifactError, InferenceError};

#[derive(Debug, Serialize, Deserialize)]
pub struct ForestModelData {
    pub num_features: usize,
    pub num_classes: usize,
    pub trees: Vec<TreeData>,
}

#[derive(Debug)]
pub struct RandomForest {
    num_features: usize,
    num_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let data: ForestModelData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn from_data(data: ForestModelData) -> Result<Self, ArtifactError> {
        if data.trees.is_empty() {
            return Err(errors::invalid_artifact("forest has no trees"));
        }
        if data.num_classes == 0 {
            return Err(errors::invalid_artifact("model has no classes"));
        }
        let trees = data
            .trees
            .into_iter()
            .map(|tree| {
                DecisionTree::from_data(
                    tree,
                    data.num_features,
                    data.num_classes,
                    SplitRule::LessOrEqual,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            num_features: data.num_features,
            num_classes: data.num_classes,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn probabilities(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let mut proba = vec![0.0; self.num_classes];
        for tree in &self.trees {
            let leaf = tree.leaf(x);
            let total: f64 = leaf.iter().sum();
            if !(total > 0.0) || !total.is_finite() {
                return Err(InferenceError::NonFinite {
                    what: "leaf distribution",
                });
            }
            for (p, v) in proba.iter_mut().zip(leaf) {
                *p += v / total;
            }
        }
        let n = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }
}

impl Classifier for RandomForest {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::RandomForest
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict_index(&self, x: &[f64]) -> Result<usize, InferenceError> {
        argmax(&self.probabilities(x)?)
    }

    fn predict_proba(&self, x: &[f64]) -> Result<Option<Vec<f64>>, InferenceError> {
        self.probabilities(x).map(Some)
    }

    fn predict_with_proba(&self, x: &[f64]) -> Result<(usize, Option<Vec<f64>>), InferenceError> {
        let proba = self.probabilities(x)?;
        Ok((argmax(&proba)?, Some(proba)))
    }
}
