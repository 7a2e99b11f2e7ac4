//! Annotated symbolic computation graphs.
//!
//! Modeling code builds expressions in a [`Registry`] and attaches
//! [`annotation`] stores carrying auxiliary quantities and update rules.
//! A [`ComputationGraph`] discovers everything its outputs depend on, merges
//! those annotations, and is rewritten through substitution (`replace`,
//! noise injection, parameter collection, batch normalization) or compiled
//! into a [`Function`].

pub mod analysis;
pub mod annotation;
pub mod compute;
pub mod config;
pub mod error;
pub mod graph;
pub mod store;

pub use annotation::{Annotation, AnnotationId, AnnotationKind};
pub use compute::{ComputationError, Function};
pub use config::{Config, ConfigError, DEFAULT_SEED};
pub use error::GraphError;
pub use graph::{apply_batch_normalization, apply_noise, collect_parameters, BatchNormOptions, ComputationGraph};
pub use store::{NodeId, NodeKind, NodeMetadata, Operation, Registry, Role, Tensor};

// FFI Facade: the `_core` Python module, built with `--features python`.
#[cfg(feature = "python")]
mod bindings {
    pub mod python;
}

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Defines the `_core` Python module.
#[cfg(feature = "python")]
#[pymodule]
fn _core(_py: Python, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<bindings::python::PyRegistry>()?;
    m.add_class::<bindings::python::PyComputationGraph>()?;
    m.add_class::<bindings::python::PyCompiledFunction>()?;
    m.add("DEFAULT_SEED", DEFAULT_SEED)?;
    Ok(())
}
