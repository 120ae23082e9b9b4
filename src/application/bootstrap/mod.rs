pub mod persistence;
pub mod services;

pub use persistence::{PersistenceBootstrap, PersistenceHandle};
pub use services::{ServicesBootstrap, ServicesHandle, default_families};
