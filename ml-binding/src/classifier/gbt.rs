//! Gradient-boosted trees (XGBoost export)
//!
//! Each tree belongs to one output group (`tree_info`). The margin of a group
//! is `base_margin` plus the leaf values of its trees; `multi:softprob`
//! applies softmax across groups, `binary:logistic` a sigmoid to a single
//! group.

use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, SplitRule, TreeData};
use super::{argmax, Classifier, ClassifierKind};
use crate::core::unified_error::{errors, ArtifactError, InferenceError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GbtObjective {
    #[default]
    #[serde(rename = "multi:softprob", alias = "multi:softmax")]
    MultiSoftprob,
    #[serde(rename = "binary:logistic")]
    BinaryLogistic,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GbtModelData {
    pub num_features: usize,
    pub num_classes: usize,
    #[serde(default)]
    pub objective: GbtObjective,
    #[serde(default)]
    pub base_margin: f64,
    pub trees: Vec<TreeData>,
    pub tree_info: Vec<usize>,
}

#[derive(Debug)]
pub struct GradientBoostedTrees {
    num_features: usize,
    num_classes: usize,
    objective: GbtObjective,
    base_margin: f64,
    trees: Vec<(usize, DecisionTree)>,
}

impl GradientBoostedTrees {
    pub fn from_json(json: &str) -> Result<Self, ArtifactError> {
        let data: GbtModelData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn from_data(data: GbtModelData) -> Result<Self, ArtifactError> {
        let num_groups = match data.objective {
            GbtObjective::MultiSoftprob => data.num_classes,
            GbtObjective::BinaryLogistic => {
                if data.num_classes != 2 {
                    return Err(errors::invalid_artifact(
                        "binary:logistic requires exactly 2 classes",
                    ));
                }
                1
            }
        };
        if num_groups == 0 {
            return Err(errors::invalid_artifact("model has no classes"));
        }
        if data.trees.len() != data.tree_info.len() {
            return Err(errors::invalid_artifact(format!(
                "{} trees but {} tree_info entries",
                data.trees.len(),
                data.tree_info.len()
            )));
        }

        let trees = data
            .trees
            .into_iter()
            .zip(data.tree_info)
            .map(|(tree, group)| {
                if group >= num_groups {
                    return Err(errors::invalid_artifact(format!(
                        "tree assigned to group {} of {}",
                        group, num_groups
                    )));
                }
                let tree = DecisionTree::from_data(tree, data.num_features, 1, SplitRule::Less)?;
                Ok((group, tree))
            })
            .collect::<Result<Vec<_>, ArtifactError>>()?;

        Ok(Self {
            num_features: data.num_features,
            num_classes: data.num_classes,
            objective: data.objective,
            base_margin: data.base_margin,
            trees,
        })
    }

    fn margins(&self, x: &[f64]) -> Vec<f64> {
        let num_groups = match self.objective {
            GbtObjective::MultiSoftprob => self.num_classes,
            GbtObjective::BinaryLogistic => 1,
        };
        let mut margins = vec![self.base_margin; num_groups];
        for (group, tree) in &self.trees {
            margins[*group] += tree.leaf(x)[0];
        }
        margins
    }

    fn probabilities(&self, x: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let margins = self.margins(x);
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(InferenceError::NonFinite { what: "margin" });
        }
        Ok(match self.objective {
            GbtObjective::MultiSoftprob => softmax(&margins),
            GbtObjective::BinaryLogistic => {
                let p = 1.0 / (1.0 + (-margins[0]).exp());
                vec![1.0 - p, p]
            }
        })
    }
}

fn softmax(margins: &[f64]) -> Vec<f64> {
    let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = margins.iter().map(|m| (m - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl Classifier for GradientBoostedTrees {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::GradientBoosting
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
