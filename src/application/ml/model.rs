use crate::domain::errors::MlError;
use crate::domain::ml::ArtifactFormat;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A trained supervised model that predicts the probability of an up move
pub trait DirectionalModel: Send + Sync {
    /// P(up) for one feature vector
    fn predict_prob(&self, features: &[f64]) -> Result<f64>;

    fn predict_batch(&self, samples: &[Vec<f64>]) -> Result<Vec<f64>> {
        samples.iter().map(|s| self.predict_prob(s)).collect()
    }

    /// Artifact bytes stored in the model registry
    fn marshal_binary(&self) -> Result<Vec<u8>>;

    fn hyperparameters(&self) -> serde_json::Value;
}

/// A trainable model family registered with the training and inference
/// services. Training options are carried by the family value itself.
pub trait ModelFamily: Send + Sync {
    /// Registry key, e.g. `logreg`
    fn key(&self) -> &str;

    fn artifact_format(&self) -> ArtifactFormat;

    fn train(
        &self,
        samples: &[Vec<f64>],
        labels: &[bool],
        feature_names: &[String],
    ) -> Result<Box<dyn DirectionalModel>>;

    fn unmarshal_binary(&self, bytes: &[u8]) -> Result<Box<dyn DirectionalModel>>;
}

/// Per-feature z-score normalisation learned from a training matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl FeatureScaler {
    /// Standard deviations below this are replaced by 1
    pub const MIN_STD: f64 = 1e-12;

    pub fn fit(samples: &[Vec<f64>]) -> Self {
        let width = samples.first().map(|s| s.len()).unwrap_or(0);
        let n = samples.len().max(1) as f64;

        let mut means = vec![0.0; width];
        for sample in samples {
            for (m, v) in means.iter_mut().zip(sample) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut stds = vec![0.0; width];
        for sample in samples {
            for ((s, v), m) in stds.iter_mut().zip(sample).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt();
            if !s.is_finite() || *s < Self::MIN_STD {
                *s = 1.0;
            }
        }

        Self { means, stds }
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform_all(&self, samples: &[Vec<f64>]) -> Vec<Vec<f64>> {
        samples.iter().map(|s| self.transform(s)).collect()
    }

    /// Rejects empty or mismatched normalisation vectors in a loaded artifact
    pub fn validate(&self, model_key: &str) -> Result<(), MlError> {
        if self.means.is_empty() || self.stds.is_empty() {
            return Err(MlError::InvalidArtifact {
                model_key: model_key.to_string(),
                reason: "empty normalisation vectors".to_string(),
            });
        }
        if self.means.len() != self.stds.len() {
            return Err(MlError::InvalidArtifact {
                model_key: model_key.to_string(),
                reason: format!(
                    "means/stds length mismatch: {} vs {}",
                    self.means.len(),
                    self.stds.len()
                ),
            });
        }
        Ok(())
    }
}

/// Shape checks shared by every family: non-empty, rectangular, non-zero
/// width, and one label per sample when labels are given.
pub fn validate_training_input(
    samples: &[Vec<f64>],
    labels: Option<&[bool]>,
) -> Result<usize, MlError> {
    let Some(first) = samples.first() else {
        return Err(MlError::InvalidDataset {
            reason: "empty training set".to_string(),
        });
    };
    let width = first.len();
    if width == 0 {
        return Err(MlError::InvalidDataset {
            reason: "zero-width feature vectors".to_string(),
        });
    }
    if let Some(row) = samples.iter().position(|s| s.len() != width) {
        return Err(MlError::InvalidDataset {
            reason: format!(
                "row {} has {} features, expected {}",
                row,
                samples[row].len(),
                width
            ),
        });
    }
    if let Some(labels) = labels
        && labels.len() != samples.len()
    {
        return Err(MlError::InvalidDataset {
            reason: format!(
                "{} labels for {} samples",
                labels.len(),
                samples.len()
            ),
        });
    }
    Ok(width)
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn dimension_mismatch(model_key: &str, expected: usize, got: usize) -> MlError {
    MlError::InvalidDataset {
        reason: format!(
            "{} expects {} features, got {}",
            model_key, expected, got
        ),
    }
}
