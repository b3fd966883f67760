//! Flattened binary decision tree shared by the forest and boosted variants
//!
//! Trees are exported as parallel arrays (scikit-learn `tree_` layout):
//! node `i` is a leaf when `children_left[i] == -1`, otherwise it splits on
//! `feature[i]` at `threshold[i]`. Every child index is greater than its
//! parent's, so evaluation always terminates.

use serde::{Deserialize, Serialize};

use crate::core::unified_error::{errors, ArtifactError};

/// Comparison that sends a sample to the left child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitRule {
    /// `x <= threshold` (scikit-learn)
    LessOrEqual,
    /// `x < threshold` (XGBoost)
    Less,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeData {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<Vec<f64>>,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(Vec<f64>),
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    rule: SplitRule,
}

impl DecisionTree {
    /// Validate and build. Leaves must hold exactly `leaf_width` values.
    pub fn from_data(
        data: TreeData,
        num_features: usize,
        leaf_width: usize,
        rule: SplitRule,
    ) -> Result<Self, ArtifactError> {
        let n = data.children_left.len();
        if n == 0 {
            return Err(errors::invalid_artifact("tree has no nodes"));
        }
        if data.children_right.len() != n
            || data.feature.len() != n
            || data.threshold.len() != n
            || data.value.len() != n
        {
            return Err(errors::invalid_artifact("tree arrays have different lengths"));
        }

        let mut nodes = Vec::with_capacity(n);
        for (i, value) in data.value.into_iter().enumerate() {
            let (left, right) = (data.children_left[i], data.children_right[i]);
            if left == -1 {
                if right != -1 {
                    return Err(errors::invalid_artifact(format!(
                        "node {} has a right child but no left child",
                        i
                    )));
                }
                if value.len() != leaf_width {
                    return Err(errors::invalid_artifact(format!(
                        "leaf {} has {} values, expected {}",
                        i,
                        value.len(),
                        leaf_width
                    )));
                }
                nodes.push(Node::Leaf(value));
                continue;
            }

            let child_ok = |c: i64| c > i as i64 && (c as usize) < n;
            if !child_ok(left) || !child_ok(right) {
                return Err(errors::invalid_artifact(format!(
                    "node {} has out-of-order children ({}, {})",
                    i, left, right
                )));
            }
            let feature = data.feature[i];
            if feature < 0 || feature as usize >= num_features {
                return Err(errors::invalid_artifact(format!(
                    "node {} splits on feature {} of {}",
                    i, feature, num_features
                )));
            }
            let threshold = data.threshold[i];
            if threshold.is_nan() {
                return Err(errors::invalid_artifact(format!("node {} has a NaN threshold", i)));
            }
            nodes.push(Node::Split {
                feature: feature as usize,
                threshold,
                left: left as usize,
                right: right as usize,
            });
        }

        Ok(Self { nodes, rule })
    }

    /// Leaf values reached by `x`. `x` must have the validated feature count.
    pub fn leaf(&self, x: &[f64]) -> &[f64] {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let go_left = match self.rule {
                        SplitRule::LessOrEqual => x[*feature] <= *threshold,
                        SplitRule::Less => x[*feature] < *threshold,
                    };
                    i = if go_left { *left } else { *right };
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Stump on feature 0: left leaf `left`, right leaf `right`
    pub fn stump(threshold: f64, left: Vec<f64>, right: Vec<f64>) -> TreeData {
        TreeData {
            children_left: vec![1, -1, -1],
            children_right: vec![2, -1, -1],
            feature: vec![0, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![vec![0.0; left.len()], left, right],
        }
    }

    #[test]
    fn test_split_rules_differ_at_threshold() {
        let inclusive =
            DecisionTree::from_data(stump(1.0, vec![1.0], vec![2.0]), 1, 1, SplitRule::LessOrEqual)
                .unwrap();
        let strict =
            DecisionTree::from_data(stump(1.0, vec![1.0], vec![2.0]), 1, 1, SplitRule::Less)
                .unwrap();

        assert_eq!(inclusive.leaf(&[1.0]), &[1.0]);
        assert_eq!(strict.leaf(&[1.0]), &[2.0]);
        assert_eq!(strict.leaf(&[0.5]), &[1.0]);
    }

    #[test]
    fn test_backward_child_rejected() {
        let mut data = stump(1.0, vec![1.0], vec![2.0]);
        data.children_left[0] = 0;
        assert!(DecisionTree::from_data(data, 1, 1, SplitRule::Less).is_err());
    }

    #[test]
    fn test_feature_out_of_range_rejected() {
        let mut data = stump(1.0, vec![1.0], vec![2.0]);
        data.feature[0] = 3;
        assert!(DecisionTree::from_data(data, 2, 1, SplitRule::Less).is_err());
    }

    #[test]
    fn test_leaf_width_checked() {
        let data = stump(1.0, vec![1.0, 0.0], vec![2.0]);
        assert!(DecisionTree::from_data(data, 1, 2, SplitRule::LessOrEqual).is_err());
    }
}
