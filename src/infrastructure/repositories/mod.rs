pub mod in_memory;

pub use in_memory::{
    InMemoryCandleRepository, InMemoryFeatureStore, InMemoryModelRegistry,
    InMemoryPredictionStore, InMemorySignalStore,
};
