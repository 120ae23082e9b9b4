use thiserror::Error;

/// Errors raised by the ML signal pipeline.
///
/// Storage adapters and services return `anyhow::Result`; these typed errors
/// travel inside it so callers can tell benign conditions apart with
/// `downcast_ref::<MlError>()`.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Insufficient samples for {context}: have {have}, need {need}")]
    InsufficientSamples {
        context: String,
        have: usize,
        need: usize,
    },

    #[error("Invalid dataset: {reason}")]
    InvalidDataset { reason: String },

    #[error("Model version not found: {model_key} v{version}")]
    ModelVersionNotFound { model_key: String, version: i64 },

    #[error("Invalid model artifact for {model_key}: {reason}")]
    InvalidArtifact { model_key: String, reason: String },

    #[error("Training failed for {model_key}: {reason}")]
    TrainingFailed { model_key: String, reason: String },

    #[error("No rows affected when updating {entity} {id}")]
    NoRowsAffected { entity: &'static str, id: i64 },

    #[error("Operation cancelled")]
    Cancelled,
}

impl MlError {
    /// Conditions that abort only the current sub-run and never the cycle
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            MlError::InsufficientSamples { .. }
                | MlError::InvalidDataset { .. }
                | MlError::InvalidArtifact { .. }
                | MlError::TrainingFailed { .. }
        )
    }
}

/// True when `err` carries an `MlError::NoRowsAffected` anywhere in its chain
pub fn is_no_rows_affected(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<MlError>(),
            Some(MlError::NoRowsAffected { .. })
        )
    })
}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<MlError>(), Some(MlError::Cancelled)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_insufficient_samples_formatting() {
        let err = MlError::InsufficientSamples {
            context: "directional training".to_string(),
            have: 120,
            need: 500,
        };

        let msg = err.to_string();
        assert!(msg.contains("directional training"));
        assert!(msg.contains("120"));
        assert!(msg.contains("500"));
        assert!(err.is_soft());
    }

    #[test]
    fn test_no_rows_affected_detected_through_context() {
        let err: anyhow::Result<()> = Err(MlError::NoRowsAffected {
            entity: "prediction",
            id: 7,
        }
        .into());
        let wrapped = err.context("Failed to resolve prediction").unwrap_err();
        assert!(is_no_rows_affected(&wrapped));
        assert!(!is_cancelled(&wrapped));
    }

    #[test]
    fn test_registry_errors_are_not_soft() {
        let err = MlError::ModelVersionNotFound {
            model_key: "logreg".to_string(),
            version: 3,
        };
        assert!(!err.is_soft());
        assert!(err.to_string().contains("logreg v3"));
    }
}
