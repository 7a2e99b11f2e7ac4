use crate::store::{NodeId, Tensor};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("Shape mismatch: {msg}")]
    ShapeMismatch { msg: String },
    #[error("Expected {expected} inputs, got {actual}")]
    InputCountMismatch { expected: usize, actual: usize },
    #[error("Input node {0:?} is needed but not bound to an argument")]
    UnboundInput(NodeId),
    #[error("Structural mismatch: {msg}")]
    Mismatch { msg: String },
    #[error("Cycle detected")]
    CycleDetected,
}

/// Dense slot storage for one program execution. Slot `i` holds the value
/// of the node the program laid out at `i`.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    values: Vec<Option<Tensor>>,
}

impl Ledger {
    pub fn with_slots(size: usize) -> Self {
        Self { values: vec![None; size] }
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    #[inline(always)]
    pub fn get(&self, slot: usize) -> Option<&Tensor> {
        self.values.get(slot)?.as_ref()
    }

    #[inline(always)]
    pub fn insert(&mut self, slot: usize, value: Tensor) {
        if slot >= self.values.len() {
            self.values.resize(slot + 1, None);
        }
        self.values[slot] = Some(value);
    }
}
