//! L2-regularised logistic regression on z-scored features.
//!
//! Fitting is delegated to smartcore's LBFGS solver; the fitted coefficients
//! are cached so single-row scoring needs no matrix allocation.

use super::model::{
    DirectionalModel, FeatureScaler, ModelFamily, dimension_mismatch, sigmoid,
    validate_training_input,
};
use crate::domain::errors::MlError;
use crate::domain::ml::ArtifactFormat;
use crate::domain::ml::model_version::LOGREG_MODEL_KEY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use tracing::debug;

type LinearClassifier = LogisticRegression<f64, i64, DenseMatrix<f64>, Vec<i64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionOptions {
    /// L2 penalty on the coefficients
    pub alpha: f64,
}

impl Default for LogisticRegressionOptions {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogisticRegressionFamily {
    pub options: LogisticRegressionOptions,
}

impl LogisticRegressionFamily {
    pub fn new(options: LogisticRegressionOptions) -> Self {
        Self { options }
    }

    fn training_failed(reason: impl std::fmt::Display) -> MlError {
        MlError::TrainingFailed {
            model_key: LOGREG_MODEL_KEY.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ModelFamily for LogisticRegressionFamily {
    fn key(&self) -> &str {
        LOGREG_MODEL_KEY
    }

    fn artifact_format(&self) -> ArtifactFormat {
        ArtifactFormat::Json
    }

    fn train(
        &self,
        samples: &[Vec<f64>],
        labels: &[bool],
        feature_names: &[String],
    ) -> Result<Box<dyn DirectionalModel>> {
        validate_training_input(samples, Some(labels))?;
        if labels.iter().all(|&l| l) || !labels.iter().any(|&l| l) {
            return Err(Self::training_failed("labels contain a single class").into());
        }

        let scaler = FeatureScaler::fit(samples);
        let x = DenseMatrix::from_2d_vec(&scaler.transform_all(samples))
            .map_err(|e| Self::training_failed(format!("Matrix error: {}", e)))?;
        let y: Vec<i64> = labels.iter().map(|&l| i64::from(l)).collect();

        let params = LogisticRegressionParameters::default().with_alpha(self.options.alpha);
        let fitted = LinearClassifier::fit(&x, &y, params)
            .map_err(|e| Self::training_failed(format!("Training error: {}", e)))?;

        let model = LogisticRegressionModel {
            feature_names: feature_names.to_vec(),
            scaler,
            options: self.options,
            fitted,
            weights: Vec::new(),
            bias: 0.0,
        }
        .with_cached_coefficients()?;
        debug!(
            "logreg fitted: bias {:.6}, |w| {:.6}",
            model.bias,
            model.weights.iter().map(|w| w * w).sum::<f64>().sqrt()
        );
        Ok(Box::new(model))
    }

    fn unmarshal_binary(&self, bytes: &[u8]) -> Result<Box<dyn DirectionalModel>> {
        let model: LogisticRegressionModel =
            serde_json::from_slice(bytes).context("Failed to decode logreg artifact")?;
        model.scaler.validate(LOGREG_MODEL_KEY)?;
        Ok(Box::new(model.with_cached_coefficients()?))
    }
}

#[derive(Serialize, Deserialize)]
pub struct LogisticRegressionModel {
    pub feature_names: Vec<String>,
    pub scaler: FeatureScaler,
    pub options: LogisticRegressionOptions,
    fitted: LinearClassifier,
    #[serde(skip)]
    weights: Vec<f64>,
    #[serde(skip)]
    bias: f64,
}

impl LogisticRegressionModel {
    /// Copy the fitted 1 x n coefficient row and intercept out of the
    /// smartcore model, checking them against the scaler width.
    fn with_cached_coefficients(mut self) -> Result<Self> {
        let invalid = |reason: String| MlError::InvalidArtifact {
            model_key: LOGREG_MODEL_KEY.to_string(),
            reason,
        };

        let coefficients = self.fitted.coefficients();
        let (rows, cols) = coefficients.shape();
        if rows != 1 || cols != self.scaler.width() {
            return Err(invalid(format!(
                "{}x{} coefficients for {} features",
                rows,
                cols,
                self.scaler.width()
            ))
            .into());
        }
        let weights: Vec<f64> = (0..cols).map(|j| *coefficients.get((0, j))).collect();

        let intercept = self.fitted.intercept();
        if intercept.shape() != (1, 1) {
            return Err(invalid("intercept is not a scalar".to_string()).into());
        }
        let bias = *intercept.get((0, 0));

        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return Err(invalid("non-finite coefficients".to_string()).into());
        }
        self.weights = weights;
        self.bias = bias;
        Ok(self)
    }
}

impl DirectionalModel for LogisticRegressionModel {
    fn predict_prob(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.weights.len() {
            return Err(
                dimension_mismatch(LOGREG_MODEL_KEY, self.weights.len(), features.len()).into(),
            );
        }
        let z = dot(&self.weights, &self.scaler.transform(features)) + self.bias;
        Ok(sigmoid(z))
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode logreg artifact")
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({
            "solver": "lbfgs",
            "alpha": self.options.alpha,
            "n_features": self.weights.len(),
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let samples: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let x = i as f64 / n as f64 - 0.5;
                vec![x, ((i * 7) % 11) as f64]
            })
            .collect();
        let labels = samples.iter().map(|s| s[0] > 0.0).collect();
        (samples, labels)
    }

    #[test]
    fn test_learns_separable_direction() {
        let (samples, labels) = separable(200);
        let family = LogisticRegressionFamily::default();
        let model = family
            .train(&samples, &labels, &["a".to_string(), "b".to_string()])
            .unwrap();

        let up = model.predict_prob(&[0.45, 3.0]).unwrap();
        let down = model.predict_prob(&[-0.45, 3.0]).unwrap();
        assert!(up > 0.5, "up={}", up);
        assert!(down < 0.5, "down={}", down);
        assert!((0.0..=1.0).contains(&up));
    }

    #[test]
    fn test_artifact_round_trip() {
        let (samples, labels) = separable(100);
        let family = LogisticRegressionFamily::default();
        let model = family.train(&samples, &labels, &[]).unwrap();
        let bytes = model.marshal_binary().unwrap();
        let restored = family.unmarshal_binary(&bytes).unwrap();

        let a = model.predict_batch(&samples).unwrap();
        let b = restored.predict_batch(&samples).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let (samples, labels) = separable(50);
        let model = LogisticRegressionFamily::default()
            .train(&samples, &labels, &[])
            .unwrap();
        assert!(model.predict_prob(&[1.0]).is_err());
    }

    #[test]
    fn test_single_class_labels_fail_training() {
        let samples = vec![vec![1.0, 2.0], vec![2.0, 3.0], vec![3.0, 4.0]];
        let err = LogisticRegressionFamily::default()
            .train(&samples, &[true, true, true], &[])
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<MlError>(),
            Some(MlError::TrainingFailed { .. })
        ));
    }

    #[test]
    fn test_artifact_carries_smartcore_model() {
        let (samples, labels) = separable(100);
        let model = LogisticRegressionFamily::default()
            .train(&samples, &labels, &[])
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&model.marshal_binary().unwrap()).unwrap();

        assert!(json.get("fitted").is_some());
        assert!(json.get("weights").is_none());
        assert_eq!(model.hyperparameters()["solver"], "lbfgs");
    }

    #[test]
    fn test_rejects_corrupt_artifact() {
        let family = LogisticRegressionFamily::default();
        assert!(family.unmarshal_binary(b"not json").is_err());
    }
}
