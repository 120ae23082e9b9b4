// Wiring of persistence and services
pub mod bootstrap;

// Model training, inference and outcome resolution
pub mod ml;

// Application lifecycle, scheduling and cancellation
pub mod system;
