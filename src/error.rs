//! Defines the error type shared by the store, annotation and graph modules.
use crate::annotation::{AnnotationId, AnnotationKind};
use crate::compute::ComputationError;
use crate::store::NodeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("node {node:?} already carries an annotation of kind '{kind}'")]
    DuplicateAnnotation { node: NodeId, kind: AnnotationKind },
    #[error("conflicting replacements for node {node:?}: {first:?} and {second:?}")]
    SubstitutionConflict { node: NodeId, first: NodeId, second: NodeId },
    #[error("update collision on {variable:?}: {existing:?} vs {incoming:?}")]
    UpdateCollision { variable: NodeId, existing: NodeId, incoming: NodeId },
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("unknown annotation {0:?}")]
    UnknownAnnotation(AnnotationId),
    #[error("node {0:?} is not a shared variable")]
    NotShared(NodeId),
    #[error("operation {op} takes {expected}, got {actual} parents")]
    ArityMismatch { op: &'static str, expected: String, actual: usize },
    #[error("no data supplied for input '{name}'")]
    MissingInput { name: String },
    #[error("{what}: expected {expected} entries, got {actual}")]
    LengthMismatch { what: &'static str, expected: usize, actual: usize },
    #[error(transparent)]
    Computation(#[from] ComputationError),
}
