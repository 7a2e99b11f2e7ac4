//! registry.rs
//! Columnar node store. Node kinds, metadata, parent edges and the
//! annotation side-table are parallel arrays indexed by `NodeId`.

use super::tensor::Tensor;
use super::types::*;
use crate::annotation::{Annotation, AnnotationId};
use crate::error::GraphError;
use smallvec::SmallVec;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    // Columnar Arrays
    pub kinds: Vec<NodeKind>,
    pub meta: Vec<NodeMetadata>,

    // Topology (CSR-ish)
    pub parents_flat: Vec<NodeId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Data Blobs: constant and shared values
    pub tensors: Vec<Tensor>,

    // Annotation side-table
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) attachments: Vec<SmallVec<[AnnotationId; 2]>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.kinds.len() }

    pub fn contains(&self, id: NodeId) -> bool { id.index() < self.count() }

    pub(crate) fn check(&self, id: NodeId) -> Result<(), GraphError> {
        if self.contains(id) { Ok(()) } else { Err(GraphError::UnknownNode(id)) }
    }

    pub(crate) fn push_node(&mut self, kind: NodeKind, parents: &[NodeId], meta: NodeMetadata) -> NodeId {
        let id = NodeId(self.kinds.len() as u32);

        // 1. Register Parents
        let start = self.parents_flat.len() as u32;
        let count = parents.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges.push((start, count));

        // 2. Metadata
        self.kinds.push(kind);
        self.meta.push(meta);
        self.attachments.push(SmallVec::new());

        id
    }

    pub fn add_input(&mut self, meta: NodeMetadata) -> NodeId {
        self.push_node(NodeKind::Input, &[], meta)
    }

    pub fn add_constant(&mut self, value: Tensor, meta: NodeMetadata) -> NodeId {
        let idx = self.tensors.len() as u32;
        self.tensors.push(value);
        self.push_node(NodeKind::Constant(idx), &[], meta)
    }

    pub fn add_shared(&mut self, value: Tensor, meta: NodeMetadata) -> NodeId {
        let idx = self.tensors.len() as u32;
        self.tensors.push(value);
        self.push_node(NodeKind::Shared(idx), &[], meta)
    }

    pub fn add_apply(&mut self, op: Operation, parents: &[NodeId], meta: NodeMetadata) -> Result<NodeId, GraphError> {
        let arity = op.arity();
        if !arity.accepts(parents.len()) {
            let expected = match arity {
                Arity::Exact(n) => n.to_string(),
                Arity::OneOf(a, b) => format!("{} or {}", a, b),
            };
            return Err(GraphError::ArityMismatch { op: op.name(), expected, actual: parents.len() });
        }
        for &parent in parents {
            self.check(parent)?;
        }
        Ok(self.push_node(NodeKind::Apply(op), parents, meta))
    }

    /// Unnamed apply node.
    pub fn apply(&mut self, op: Operation, parents: &[NodeId]) -> Result<NodeId, GraphError> {
        self.add_apply(op, parents, NodeMetadata::default())
    }

    /// Wraps a literal into an unnamed constant node.
    pub fn literal(&mut self, value: f64) -> NodeId {
        self.add_constant(Tensor::scalar(value), NodeMetadata::default())
    }

    #[inline(always)]
    pub fn get_parents(&self, id: NodeId) -> &[NodeId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind { &self.kinds[id.index()] }
    pub fn metadata(&self, id: NodeId) -> &NodeMetadata { &self.meta[id.index()] }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.meta.get(id.index()).and_then(|m| m.name.as_deref())
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        self.check(id)?;
        self.meta[id.index()].name = Some(name.into());
        Ok(())
    }

    pub fn add_role(&mut self, id: NodeId, role: Role) -> Result<(), GraphError> {
        self.check(id)?;
        self.meta[id.index()].add_role(role);
        Ok(())
    }

    pub fn has_role(&self, id: NodeId, role: Role) -> bool {
        self.meta.get(id.index()).is_some_and(|m| m.has_role(role))
    }

    pub fn is_input(&self, id: NodeId) -> bool { matches!(self.kinds[id.index()], NodeKind::Input) }
    pub fn is_shared(&self, id: NodeId) -> bool { matches!(self.kinds[id.index()], NodeKind::Shared(_)) }

    /// Current value of a constant or shared node.
    pub fn value(&self, id: NodeId) -> Option<&Tensor> {
        match self.kinds.get(id.index())? {
            NodeKind::Constant(idx) | NodeKind::Shared(idx) => self.tensors.get(*idx as usize),
            _ => None,
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: Tensor) -> Result<(), GraphError> {
        self.check(id)?;
        match self.kinds[id.index()] {
            NodeKind::Shared(idx) => {
                self.tensors[idx as usize] = value;
                Ok(())
            }
            _ => Err(GraphError::NotShared(id)),
        }
    }

    /// Annotation stores attached to `id`, in attachment order.
    pub fn attachments(&self, id: NodeId) -> &[AnnotationId] {
        self.attachments.get(id.index()).map(|a| a.as_slice()).unwrap_or(&[])
    }

    /// Gives `to` the metadata and annotation attachments of `from`.
    pub(crate) fn copy_tag(&mut self, from: NodeId, to: NodeId) {
        self.meta[to.index()] = self.meta[from.index()].clone();
        self.attachments[to.index()] = self.attachments[from.index()].clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parents_are_ordered() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.add_input(NodeMetadata::named("y"));
        let d = reg.add_apply(Operation::Subtract, &[y, x], NodeMetadata::named("d")).unwrap();
        assert_eq!(reg.get_parents(d), &[y, x]);
        assert!(reg.get_parents(x).is_empty());
        assert_eq!(reg.name(d), Some("d"));
    }

    #[test]
    fn test_arity_is_checked() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let err = reg.apply(Operation::Add, &[x]).unwrap_err();
        assert!(matches!(err, GraphError::ArityMismatch { op: "Add", actual: 1, .. }));
        let err = reg.apply(Operation::Exp, &[NodeId(42)]).unwrap_err();
        assert_eq!(err, GraphError::UnknownNode(NodeId(42)));
    }

    #[test]
    fn test_set_value_only_on_shared() {
        let mut reg = Registry::new();
        let w = reg.add_shared(Tensor::zeros(&[2]), NodeMetadata::named("W"));
        let c = reg.literal(1.0);
        reg.set_value(w, Tensor::vector(vec![1.0, 2.0])).unwrap();
        assert_eq!(reg.value(w).unwrap().data(), &[1.0, 2.0]);
        assert_eq!(reg.set_value(c, Tensor::scalar(2.0)), Err(GraphError::NotShared(c)));
    }

    #[test]
    fn test_roles_are_a_set() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::default());
        reg.add_role(x, Role::Cost).unwrap();
        reg.add_role(x, Role::Cost).unwrap();
        assert_eq!(reg.metadata(x).roles.len(), 1);
        assert!(reg.has_role(x, Role::Cost));
        assert!(!reg.has_role(x, Role::Auxiliary));
    }
}
