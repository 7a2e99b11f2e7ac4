//! Node store: identities, kinds, metadata and values of every expression.
mod registry;
mod tensor;
mod types;

pub use registry::Registry;
pub use tensor::Tensor;
pub use types::{Arity, NodeId, NodeKind, NodeMetadata, Operation, Role, Shape};
