//! Annotations attached to nodes by modeling components.
//!
//! An `Annotation` bundles auxiliary expressions (monitored quantities,
//! regularizers) and update rules for stateful variables. Stores live in an
//! arena inside the `Registry`; nodes reference them through a side-table, so
//! a node reused across several graphs never has its own fields mutated.
//!
//! ```rust,ignore
//! let mut reg = Registry::new();
//! let x = reg.add_input(NodeMetadata::named("x"));
//! let one = reg.literal(1.0);
//! let call = reg.create_annotation(AnnotationKind::APPLICATION_CALL);
//! let x_plus_1 = reg.apply(Operation::Add, &[x, one])?;
//! reg.add_auxiliary_variable(call, x_plus_1, &[], Some("x_plus_1"))?;
//! reg.attach_annotation(x, call)?;
//! let y = reg.apply(Operation::Square, &[x])?;
//! let cg = ComputationGraph::new(&reg, y)?;
//! assert_eq!(cg.auxiliary_variables(&reg), vec![x_plus_1]);
//! ```

use crate::error::GraphError;
use crate::store::{NodeId, Registry, Role};
use indexmap::IndexMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationId(pub u32);

impl AnnotationId {
    pub fn index(&self) -> usize { self.0 as usize }
}

/// The concrete kind of an annotation store. A node carries at most one
/// store of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotationKind(pub &'static str);

impl AnnotationKind {
    /// Attached once per brick, e.g. the norm of its weights.
    pub const BRICK: AnnotationKind = AnnotationKind("brick");
    /// Attached once per application of a brick to some inputs.
    pub const APPLICATION_CALL: AnnotationKind = AnnotationKind("application_call");
    pub const GENERIC: AnnotationKind = AnnotationKind("generic");

    /// Looks up one of the built-in kinds by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::BRICK, Self::APPLICATION_CALL, Self::GENERIC].into_iter().find(|kind| kind.0 == name)
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub auxiliary_variables: Vec<NodeId>,
    /// Stateful variable -> expression for its next value.
    pub updates: IndexMap<NodeId, NodeId>,
}

impl Annotation {
    pub fn new(kind: AnnotationKind) -> Self {
        Self { kind, auxiliary_variables: Vec::new(), updates: IndexMap::new() }
    }
}

impl Registry {
    pub fn create_annotation(&mut self, kind: AnnotationKind) -> AnnotationId {
        let id = AnnotationId(self.annotations.len() as u32);
        self.annotations.push(Annotation::new(kind));
        id
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(id.index())
    }

    fn check_annotation(&self, id: AnnotationId) -> Result<(), GraphError> {
        if id.index() < self.annotations.len() { Ok(()) } else { Err(GraphError::UnknownAnnotation(id)) }
    }

    /// Attaches `annotation` to `node`. Fails if `node` already carries a
    /// store of the same kind.
    pub fn attach_annotation(&mut self, node: NodeId, annotation: AnnotationId) -> Result<(), GraphError> {
        self.check(node)?;
        self.check_annotation(annotation)?;
        let kind = self.annotations[annotation.index()].kind;
        let taken = self.attachments[node.index()]
            .iter()
            .any(|a| self.annotations[a.index()].kind == kind);
        if taken {
            return Err(GraphError::DuplicateAnnotation { node, kind });
        }
        self.attachments[node.index()].push(annotation);
        Ok(())
    }

    /// Registers `expression` as an auxiliary variable of `annotation`.
    ///
    /// The store is attached to `expression` itself, the `Auxiliary` role is
    /// always added next to `roles`, and `name` overrides any existing name.
    pub fn add_auxiliary_variable(
        &mut self,
        annotation: AnnotationId,
        expression: NodeId,
        roles: &[Role],
        name: Option<&str>,
    ) -> Result<(), GraphError> {
        self.attach_annotation(expression, annotation)?;
        if let Some(name) = name {
            self.set_name(expression, name)?;
        }
        self.add_role(expression, Role::Auxiliary)?;
        for &role in roles {
            self.add_role(expression, role)?;
        }
        self.annotations[annotation.index()].auxiliary_variables.push(expression);
        Ok(())
    }

    /// Records that `variable` takes the value of `expression` after every
    /// invocation of a function compiled from a graph containing the store.
    pub fn add_update(&mut self, annotation: AnnotationId, variable: NodeId, expression: NodeId) -> Result<(), GraphError> {
        self.check_annotation(annotation)?;
        self.check(variable)?;
        self.check(expression)?;
        if !self.is_shared(variable) {
            return Err(GraphError::NotShared(variable));
        }
        self.annotations[annotation.index()].updates.insert(variable, expression);
        Ok(())
    }
}
