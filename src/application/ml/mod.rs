// Model families, training, inference and outcome resolution
pub mod dataset;
pub mod ensemble;
pub mod gradient_boosting;
pub mod inference_service;
pub mod isolation_forest;
pub mod logistic_regression;
pub mod metrics;
pub mod model;
pub mod outcome_resolver;
pub mod signal_service;
pub mod training_service;

pub use gradient_boosting::{GradientBoostingFamily, GradientBoostingOptions};
pub use inference_service::{InferenceConfig, InferenceReport, InferenceService};
pub use isolation_forest::{IsolationForestModel, IsolationForestOptions};
pub use logistic_regression::{LogisticRegressionFamily, LogisticRegressionOptions};
pub use model::{DirectionalModel, ModelFamily};
pub use outcome_resolver::{OutcomeResolver, ResolutionReport, should_resolve_prediction};
pub use signal_service::{CycleReport, MlSignalService};
pub use training_service::{TrainingConfig, TrainingReport, TrainingResult, TrainingService};
