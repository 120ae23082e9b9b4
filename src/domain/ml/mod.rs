// Machine-learning domain: feature rows, model registry records, predictions, signals
pub mod feature_registry;
pub mod model_version;
pub mod prediction;
pub mod signal;

pub use feature_registry::{FEATURE_COUNT, FEATURE_NAMES, FeatureRow};
pub use model_version::{ArtifactFormat, ModelVersion};
pub use prediction::{Prediction, PredictionFilter, PredictionResolution};
pub use signal::{Direction, RiskLevel, Signal, SignalFilter};
