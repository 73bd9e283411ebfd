//! Strategy classifier
//!
//! Inference over a persisted model artifact. The artifact carries its own
//! feature schema and label set; inputs that do not match are rejected.

pub mod artifact;

pub use artifact::{DecisionTree, ModelArtifact, ModelKind, TreeNode};

use crate::error::OrchestrationError;
use crate::models::{FeatureVector, Prediction};
use crate::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Loaded, validated classifier. Immutable and shareable across runs.
#[derive(Debug, Clone)]
pub struct StrategyClassifier {
    artifact: ModelArtifact,
}

impl StrategyClassifier {
    pub fn new(artifact: ModelArtifact) -> Result<Self> {
        artifact.validate()?;
        Ok(Self { artifact })
    }

    /// Load and validate a JSON artifact
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let artifact: ModelArtifact = serde_json::from_str(&raw)
            .map_err(|e| OrchestrationError::Artifact(format!("invalid artifact JSON: {}", e)))?;

        let classifier = Self::new(artifact)?;
        info!(
            path = %path.as_ref().display(),
            version = %classifier.artifact.version,
            features = classifier.artifact.feature_names.len(),
            labels = ?classifier.artifact.labels,
            "Strategy classifier loaded"
        );
        Ok(classifier)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.artifact.feature_names
    }

    pub fn labels(&self) -> &[String] {
        &self.artifact.labels
    }

    pub fn version(&self) -> &str {
        &self.artifact.version
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        self.check_schema(features)?;

        if let Some(i) = features.values.iter().position(|v| !v.is_finite()) {
            return Err(OrchestrationError::InvalidInput(format!(
                "feature '{}' is not finite",
                features.names[i]
            )));
        }

        let probabilities = self.artifact.model.probabilities(&features.values);

        let (best, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bp), (i, p)| {
                if p > bp {
                    (i, p)
                } else {
                    (bi, bp)
                }
            });

        let label = self.artifact.labels[best].clone();
        debug!(%label, confidence, "Strategy predicted");

        Ok(Prediction {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            probabilities: self
                .artifact
                .labels
                .iter()
                .cloned()
                .zip(probabilities)
                .collect::<BTreeMap<_, _>>(),
        })
    }

    fn check_schema(&self, features: &FeatureVector) -> Result<()> {
        let expected = &self.artifact.feature_names;

        if features.values.len() != expected.len() || features.names.len() != expected.len() {
            return Err(OrchestrationError::SchemaMismatch(format!(
                "expected {} features, got {} values / {} names",
                expected.len(),
                features.values.len(),
                features.names.len()
            )));
        }

        if let Some((i, (got, want))) = features
            .names
            .iter()
            .zip(expected)
            .enumerate()
            .find(|(_, (got, want))| got != want)
        {
            return Err(OrchestrationError::SchemaMismatch(format!(
                "feature {} is '{}', artifact expects '{}'",
                i, got, want
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn logistic() -> StrategyClassifier {
        StrategyClassifier::new(ModelArtifact {
            version: "test".to_string(),
            feature_names: names(&["rsi", "price_position"]),
            labels: names(&["BOTTOM", "NEUTRAL", "TOP"]),
            model: ModelKind::Logistic {
                weights: vec![vec![0.1, 2.0], vec![0.0, 0.0], vec![-0.1, -2.0]],
                bias: vec![-5.0, 0.0, 5.0],
            },
        })
        .unwrap()
    }

    fn forest() -> StrategyClassifier {
        let tree = DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 35.0,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf {
                    probabilities: vec![0.2, 0.8],
                },
                TreeNode::Leaf {
                    probabilities: vec![0.7, 0.3],
                },
            ],
        };
        let stump = DecisionTree {
            nodes: vec![TreeNode::Leaf {
                probabilities: vec![0.5, 0.5],
            }],
        };

        StrategyClassifier::new(ModelArtifact {
            version: "forest".to_string(),
            feature_names: names(&["rsi"]),
            labels: names(&["BOTTOM", "TOP"]),
            model: ModelKind::Forest {
                trees: vec![tree, stump],
            },
        })
        .unwrap()
    }

    fn vector(list: &[&str], values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            names: names(list),
            values,
        }
    }

    #[test]
    fn test_logistic_prediction_is_a_probability() {
        let prediction = logistic()
            .predict(&vector(&["rsi", "price_position"], vec![25.0, 0.1]))
            .unwrap();

        assert_eq!(prediction.label, "TOP");
        assert!((0.0..=1.0).contains(&prediction.confidence));
        let total: f64 = prediction.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(prediction.confidence, prediction.probabilities["TOP"]);
    }

    #[test]
    fn test_forest_averages_leaf_distributions() {
        let prediction = forest().predict(&vector(&["rsi"], vec![20.0])).unwrap();
        assert_eq!(prediction.label, "TOP");
        assert!((prediction.confidence - 0.65).abs() < 1e-9);

        let prediction = forest().predict(&vector(&["rsi"], vec![80.0])).unwrap();
        assert_eq!(prediction.label, "BOTTOM");
        assert!((prediction.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_dimension_is_schema_mismatch() {
        let classifier = logistic();

        for values in [vec![], vec![50.0], vec![50.0, 0.5, 1.0]] {
            let names_for: Vec<&str> = ["rsi", "price_position", "extra"]
                .into_iter()
                .take(values.len())
                .collect();
            let result = classifier.predict(&vector(&names_for, values));
            assert!(matches!(result, Err(OrchestrationError::SchemaMismatch(_))));
        }
    }

    #[test]
    fn test_wrong_order_is_schema_mismatch() {
        let result = logistic().predict(&vector(&["price_position", "rsi"], vec![0.5, 50.0]));
        assert!(matches!(result, Err(OrchestrationError::SchemaMismatch(_))));
    }

    #[test]
    fn test_non_finite_feature_rejected() {
        let result = logistic().predict(&vector(&["rsi", "price_position"], vec![f64::NAN, 0.5]));
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }

    #[test]
    fn test_shipped_artifact_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/models/strategy_classifier.json");
        let classifier = StrategyClassifier::load(path).unwrap();

        assert_eq!(classifier.labels(), &["BOTTOM".to_string(), "TOP".to_string()]);
        assert_eq!(classifier.feature_names().len(), 6);
    }
}
