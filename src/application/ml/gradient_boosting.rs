//! Gradient-boosted regression trees on the logistic loss.
//!
//! Registered under the `xgboost` model key. Each boosting round fits a
//! smartcore regression tree to the negative gradient `y - sigmoid(F)` and
//! adds it to the raw score with shrinkage.

use super::model::{
    DirectionalModel, ModelFamily, dimension_mismatch, sigmoid, validate_training_input,
};
use crate::domain::errors::MlError;
use crate::domain::ml::ArtifactFormat;
use crate::domain::ml::model_version::XGBOOST_MODEL_KEY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use tracing::debug;

type RegressionTree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingOptions {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
}

impl Default for GradientBoostingOptions {
    fn default() -> Self {
        Self {
            n_estimators: 60,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradientBoostingFamily {
    pub options: GradientBoostingOptions,
}

impl GradientBoostingFamily {
    pub fn new(options: GradientBoostingOptions) -> Self {
        Self { options }
    }

    fn training_failed(reason: impl std::fmt::Display) -> MlError {
        MlError::TrainingFailed {
            model_key: XGBOOST_MODEL_KEY.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl ModelFamily for GradientBoostingFamily {
    fn key(&self) -> &str {
        XGBOOST_MODEL_KEY
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
        let width = validate_training_input(samples, Some(labels))?;
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let n = y.len() as f64;

        // Prior log-odds of the positive class
        let base_rate = (y.iter().sum::<f64>() / n).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (base_rate / (1.0 - base_rate)).ln();

        let x = DenseMatrix::from_2d_vec(&samples.to_vec())
            .map_err(|e| Self::training_failed(format!("Matrix error: {}", e)))?;
        let params = DecisionTreeRegressorParameters::default()
            .with_max_depth(self.options.max_depth)
            .with_min_samples_leaf(self.options.min_samples_leaf);

        let mut raw = vec![base_score; y.len()];
        let mut trees = Vec::with_capacity(self.options.n_estimators);

        for round in 0..self.options.n_estimators {
            let residuals: Vec<f64> = raw
                .iter()
                .zip(&y)
                .map(|(f, yi)| yi - sigmoid(*f))
                .collect();

            let tree = RegressionTree::fit(&x, &residuals, params.clone())
                .map_err(|e| Self::training_failed(format!("Training error: {}", e)))?;
            let step: Vec<f64> = tree
                .predict(&x)
                .map_err(|e| Self::training_failed(format!("Predict error: {}", e)))?;

            for (f, s) in raw.iter_mut().zip(&step) {
                *f += self.options.learning_rate * s;
            }
            trees.push(tree);

            if round % 20 == 0 {
                let mean_abs = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;
                debug!("xgboost round {}: mean |residual| {:.6}", round, mean_abs);
            }
        }

        Ok(Box::new(GradientBoostingModel {
            feature_names: feature_names.to_vec(),
            n_features: width,
            base_score,
            options: self.options,
            trees,
        }))
    }

    fn unmarshal_binary(&self, bytes: &[u8]) -> Result<Box<dyn DirectionalModel>> {
        let model: GradientBoostingModel =
            serde_json::from_slice(bytes).context("Failed to decode xgboost artifact")?;
        if model.n_features == 0 {
            return Err(MlError::InvalidArtifact {
                model_key: XGBOOST_MODEL_KEY.to_string(),
                reason: "zero feature width".to_string(),
            }
            .into());
        }
        Ok(Box::new(model))
    }
}

#[derive(Serialize, Deserialize)]
pub struct GradientBoostingModel {
    pub feature_names: Vec<String>,
    pub n_features: usize,
    pub base_score: f64,
    pub options: GradientBoostingOptions,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingModel {
    fn raw_scores(&self, samples: &[Vec<f64>]) -> Result<Vec<f64>> {
        if let Some(bad) = samples.iter().find(|s| s.len() != self.n_features) {
            return Err(dimension_mismatch(XGBOOST_MODEL_KEY, self.n_features, bad.len()).into());
        }
        let mut raw = vec![self.base_score; samples.len()];
        if samples.is_empty() || self.trees.is_empty() {
            return Ok(raw);
        }

        let x = DenseMatrix::from_2d_vec(&samples.to_vec())
            .map_err(|e| anyhow::anyhow!("Matrix creation failed: {}", e))?;
        for tree in &self.trees {
            let step: Vec<f64> = tree
                .predict(&x)
                .map_err(|e| anyhow::anyhow!("Prediction failed: {}", e))?;
            for (f, s) in raw.iter_mut().zip(&step) {
                *f += self.options.learning_rate * s;
            }
        }
        Ok(raw)
    }
}

impl DirectionalModel for GradientBoostingModel {
    fn predict_prob(&self, features: &[f64]) -> Result<f64> {
        let raw = self.raw_scores(&[features.to_vec()])?;
        Ok(raw.first().map(|f| sigmoid(*f)).unwrap_or(0.5))
    }

    fn predict_batch(&self, samples: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(self.raw_scores(samples)?.into_iter().map(sigmoid).collect())
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode xgboost artifact")
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({
            "n_estimators": self.options.n_estimators,
            "learning_rate": self.options.learning_rate,
            "max_depth": self.options.max_depth,
            "min_samples_leaf": self.options.min_samples_leaf,
            "objective": "binary:logistic",
        })
    }
}
