//! Managed computation graphs and the rewrites defined over them.
pub mod computation;
pub mod discovery;
pub mod transform;

// Re-export key types for convenient access
pub use computation::{ComputationGraph, IntoOutputs};
pub use discovery::Discovery;
pub use transform::{apply_batch_normalization, apply_noise, collect_parameters, BatchNormOptions};
