//! Structural algorithms over the node store.
pub mod substitution;
pub mod topology;
