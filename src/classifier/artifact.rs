//! Persisted classifier artifact format and validation

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    /// Feature schema, in the order the model was trained with
    pub feature_names: Vec<String>,
    /// Closed label set; index i is class i
    pub labels: Vec<String>,
    pub model: ModelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    /// Multinomial logistic regression: softmax(W·x + b)
    Logistic {
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
    },
    /// Tree ensemble; class probabilities are averaged over trees
    Forest { trees: Vec<DecisionTree> },
}

/// Flat tree, root at index 0. Children always sit after their parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// `x[feature] <= threshold` goes left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { probabilities: Vec<f64> },
}

fn invalid(msg: String) -> OrchestrationError {
    OrchestrationError::Artifact(msg)
}

impl ModelArtifact {
    pub fn validate(&self) -> Result<()> {
        let n_features = self.feature_names.len();
        let n_labels = self.labels.len();

        if n_features == 0 {
            return Err(invalid("artifact declares no features".to_string()));
        }
        if n_labels < 2 {
            return Err(invalid("artifact needs at least two labels".to_string()));
        }
        if self.feature_names.iter().collect::<HashSet<_>>().len() != n_features {
            return Err(invalid("duplicate feature names".to_string()));
        }
        if self.labels.iter().collect::<HashSet<_>>().len() != n_labels {
            return Err(invalid("duplicate labels".to_string()));
        }

        match &self.model {
            ModelKind::Logistic { weights, bias } => {
                if weights.len() != n_labels || bias.len() != n_labels {
                    return Err(invalid(format!(
                        "logistic model needs {} weight rows and biases",
                        n_labels
                    )));
                }
                if weights.iter().any(|row| row.len() != n_features) {
                    return Err(invalid(format!(
                        "every weight row needs {} coefficients",
                        n_features
                    )));
                }
                if weights.iter().flatten().chain(bias).any(|v| !v.is_finite()) {
                    return Err(invalid("non-finite coefficient".to_string()));
                }
            }
            ModelKind::Forest { trees } => {
                if trees.is_empty() {
                    return Err(invalid("forest has no trees".to_string()));
                }
                for (t, tree) in trees.iter().enumerate() {
                    tree.validate(n_features, n_labels)
                        .map_err(|msg| invalid(format!("tree {}: {}", t, msg)))?;
                }
            }
        }

        Ok(())
    }
}

impl DecisionTree {
    fn validate(&self, n_features: usize, n_labels: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no nodes".to_string());
        }

        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {} uses unknown feature {}", i, feature));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", i));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", i, child));
                        }
                    }
                }
                TreeNode::Leaf { probabilities } => {
                    if probabilities.len() != n_labels {
                        return Err(format!(
                            "leaf {} has {} probabilities, expected {}",
                            i,
                            probabilities.len(),
                            n_labels
                        ));
                    }
                    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0)
                        || probabilities.iter().sum::<f64>() <= 0.0
                    {
                        return Err(format!("leaf {} has an invalid distribution", i));
                    }
                }
            }
        }

        Ok(())
    }

    /// Normalized class distribution of the leaf `x` falls into
    fn leaf_distribution(&self, x: &[f64]) -> Vec<f64> {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf { probabilities } => {
                    let total: f64 = probabilities.iter().sum();
                    return probabilities.iter().map(|p| p / total).collect();
                }
            }
        }
    }
}

impl ModelKind {
    /// Class probabilities for a validated input, summing to 1
    pub(crate) fn probabilities(&self, x: &[f64]) -> Vec<f64> {
        match self {
            ModelKind::Logistic { weights, bias } => {
                let logits: Vec<f64> = weights
                    .iter()
                    .zip(bias)
                    .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
                    .collect();
                softmax(&logits)
            }
            ModelKind::Forest { trees } => {
                let mut acc: Vec<f64> = Vec::new();
                for tree in trees {
                    let dist = tree.leaf_distribution(x);
                    if acc.is_empty() {
                        acc = dist;
                    } else {
                        acc.iter_mut().zip(dist).for_each(|(a, d)| *a += d);
                    }
                }
                let n = trees.len() as f64;
                acc.iter().map(|p| p / n).collect()
            }
        }
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}
