//! Isolation Forest anomaly scorer.
//!
//! Anomalies are isolated by fewer random splits than normal points, so the
//! expected path length through a forest of random trees is a density-free
//! anomaly measure. One model is trained per candle interval and stored as a
//! single JSON artifact.

use super::model::{FeatureScaler, validate_training_input};
use crate::domain::errors::MlError;
use crate::domain::market::Timeframe;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.5772156649;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationForestOptions {
    pub n_trees: usize,
    /// Per-tree subsample size ψ (without replacement)
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for IsolationForestOptions {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IsolationNode {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    sample_size: usize,
    max_depth: usize,
    root: IsolationNode,
}

impl IsolationTree {
    fn build(data: &Array2<f64>, indices: &[usize], max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            sample_size: indices.len(),
            max_depth,
            root: Self::build_node(data, indices, 0, max_depth, rng),
        }
    }

    fn build_node(
        data: &Array2<f64>,
        indices: &[usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> IsolationNode {
        if depth >= max_depth || indices.len() <= 1 {
            return IsolationNode::Leaf {
                size: indices.len(),
            };
        }

        let feature = rng.random_range(0..data.ncols());
        let (min_val, max_val) = indices.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), &i| (lo.min(data[[i, feature]]), hi.max(data[[i, feature]])),
        );
        if (max_val - min_val).abs() < 1e-10 {
            return IsolationNode::Leaf {
                size: indices.len(),
            };
        }

        let threshold = rng.random_range(min_val..max_val);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| data[[i, feature]] < threshold);
        if left.is_empty() || right.is_empty() {
            return IsolationNode::Leaf {
                size: indices.len(),
            };
        }

        IsolationNode::Internal {
            feature,
            threshold,
            left: Box::new(Self::build_node(data, &left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(data, &right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth as f64 + average_path_length(*size),
                IsolationNode::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = sample.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

/// c(n): average path length of an unsuccessful BST search over n points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Trained forest plus everything needed to score raw feature vectors.
/// Serialises directly to the registry artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestModel {
    pub model_key: String,
    pub interval: Timeframe,
    pub feature_names: Vec<String>,
    #[serde(flatten)]
    pub scaler: FeatureScaler,
    pub options: IsolationForestOptions,
    trees: Vec<IsolationTree>,
    pub trained_from: DateTime<Utc>,
    pub trained_to: DateTime<Utc>,
}

impl IsolationForestModel {
    /// Fit on a raw (unnormalised) feature matrix
    pub fn train(
        model_key: &str,
        interval: Timeframe,
        samples: &[Vec<f64>],
        feature_names: &[String],
        options: IsolationForestOptions,
        trained_from: DateTime<Utc>,
        trained_to: DateTime<Utc>,
    ) -> Result<Self, MlError> {
        let width = validate_training_input(samples, None)?;
        if options.n_trees == 0 || options.sample_size == 0 {
            return Err(MlError::InvalidDataset {
                reason: "isolation forest needs at least one tree and one sample per tree"
                    .to_string(),
            });
        }

        let scaler = FeatureScaler::fit(samples);
        let n = samples.len();
        let normalized: Vec<f64> = samples.iter().flat_map(|s| scaler.transform(s)).collect();
        let data = Array2::from_shape_vec((n, width), normalized).map_err(|e| {
            MlError::InvalidDataset {
                reason: format!("feature matrix shape: {}", e),
            }
        })?;

        let psi = options.sample_size.min(n);
        let max_depth = (psi as f64).log2().ceil() as usize;

        let trees: Vec<IsolationTree> = (0..options.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(i as u64));
                let indices = rand::seq::index::sample(&mut rng, n, psi).into_vec();
                IsolationTree::build(&data, &indices, max_depth, &mut rng)
            })
            .collect();

        Ok(Self {
            model_key: model_key.to_string(),
            interval,
            feature_names: feature_names.to_vec(),
            scaler,
            options,
            trees,
            trained_from,
            trained_to,
        })
    }

    pub fn n_features(&self) -> usize {
        self.scaler.width()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Anomaly score in [0, 1]; higher is more anomalous.
    /// Returns 0 for a dimension mismatch or an empty forest.
    pub fn score(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() || features.len() != self.n_features() {
            return 0.0;
        }
        let normalized = self.scaler.transform(features);
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(&normalized))
            .sum::<f64>()
            / self.trees.len() as f64;

        let c = average_path_length(self.trees[0].sample_size);
        let score = if c > 0.0 {
            2f64.powf(-mean_path / c)
        } else {
            0.5
        };
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn score_batch(&self, samples: &[Vec<f64>]) -> Vec<f64> {
        samples.par_iter().map(|s| self.score(s)).collect()
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode isolation forest artifact")
    }

    pub fn unmarshal_binary(bytes: &[u8]) -> Result<Self> {
        let model: IsolationForestModel = serde_json::from_slice(bytes)
            .context("Failed to decode isolation forest artifact")?;
        model.scaler.validate(&model.model_key)?;
        if model.trees.is_empty() {
            return Err(MlError::InvalidArtifact {
                model_key: model.model_key.clone(),
                reason: "no trees".to_string(),
            }
            .into());
        }
        Ok(model)
    }

    pub fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({
            "n_trees": self.options.n_trees,
            "sample_size": self.options.sample_size,
            "seed": self.options.seed,
            "max_depth": self.trees.first().map(|t| t.max_depth).unwrap_or(0),
            "n_features": self.n_features(),
        })
    }
}
