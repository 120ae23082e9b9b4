// Market data domain
pub mod market;

// ML signal domain
pub mod ml;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
