//! computation.rs
//! The managed computation graph: a discovered node set plus the updates its
//! annotations carry.

use super::discovery::{self, Discovery};
use crate::analysis::substitution;
use crate::compute::Function;
use crate::error::GraphError;
use crate::store::{NodeId, NodeKind, Registry, Role, Tensor};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Anything that can name the outputs of a graph: one node or several.
pub trait IntoOutputs {
    fn into_outputs(self) -> Vec<NodeId>;
}

impl IntoOutputs for NodeId {
    fn into_outputs(self) -> Vec<NodeId> { vec![self] }
}

impl IntoOutputs for Vec<NodeId> {
    fn into_outputs(self) -> Vec<NodeId> { self }
}

impl IntoOutputs for &[NodeId] {
    fn into_outputs(self) -> Vec<NodeId> { self.to_vec() }
}

impl<const N: usize> IntoOutputs for [NodeId; N] {
    fn into_outputs(self) -> Vec<NodeId> { self.to_vec() }
}

/// Every variable needed to compute `outputs`, the auxiliary variables
/// reachable through annotations, and the merged update rules.
///
/// Variables are listed in dependency order without repeats. The graph does
/// not own the nodes; views take the `Registry` the graph was built from.
/// Once built it never changes: `replace` returns a new graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationGraph {
    outputs: Vec<NodeId>,
    variables: Vec<NodeId>,
    updates: IndexMap<NodeId, NodeId>,
}

impl ComputationGraph {
    pub fn new(registry: &Registry, outputs: impl IntoOutputs) -> Result<Self, GraphError> {
        let outputs = outputs.into_outputs();
        let Discovery { variables, updates } = discovery::discover(registry, &outputs)?;
        Ok(Self { outputs, variables, updates })
    }

    pub fn outputs(&self) -> &[NodeId] { &self.outputs }
    pub fn variables(&self) -> &[NodeId] { &self.variables }
    pub fn updates(&self) -> &IndexMap<NodeId, NodeId> { &self.updates }

    // --- Views ---

    /// Graph inputs. Shared variables and constants are not inputs.
    pub fn inputs(&self, registry: &Registry) -> Vec<NodeId> {
        self.filter(|n| matches!(registry.kind(n), NodeKind::Input))
    }

    pub fn shared_variables(&self, registry: &Registry) -> Vec<NodeId> {
        self.filter(|n| registry.is_shared(n))
    }

    pub fn auxiliary_variables(&self, registry: &Registry) -> Vec<NodeId> {
        self.variables_with_role(registry, Role::Auxiliary)
    }

    /// Variables that are neither inputs nor outputs.
    pub fn intermediary_variables(&self, registry: &Registry) -> Vec<NodeId> {
        self.filter(|n| !registry.is_input(n) && !self.outputs.contains(&n))
    }

    pub fn variables_with_role(&self, registry: &Registry, role: Role) -> Vec<NodeId> {
        self.filter(|n| registry.has_role(n, role))
    }

    /// Maps input names to inputs. Unnamed inputs are left out; when two
    /// inputs share a name the later one wins.
    pub fn dict_of_inputs(&self, registry: &Registry) -> HashMap<String, NodeId> {
        let mut named = HashMap::new();
        for input in self.inputs(registry) {
            let Some(name) = registry.name(input) else { continue };
            if let Some(previous) = named.insert(name.to_owned(), input) {
                tracing::warn!(
                    input_name = %name,
                    "Input name '{}' is used by {:?} and {:?}; keeping the latter.",
                    name,
                    previous,
                    input
                );
            }
        }
        named
    }

    fn filter(&self, keep: impl Fn(NodeId) -> bool) -> Vec<NodeId> {
        self.variables.iter().copied().filter(|&n| keep(n)).collect()
    }

    // --- Transformations ---

    /// Builds a new graph with every `(old, new)` pair substituted at once.
    ///
    /// Nodes downstream of a replaced node are rebuilt; the rest are shared
    /// with this graph, which is left untouched. Repeating a pair is fine,
    /// giving one node two different replacements is not.
    pub fn replace(
        &self,
        registry: &mut Registry,
        replacements: impl IntoIterator<Item = (NodeId, NodeId)>,
    ) -> Result<Self, GraphError> {
        let mut map: IndexMap<NodeId, NodeId> = IndexMap::new();
        for (old, new) in replacements {
            match map.get(&old) {
                Some(&first) if first != new => {
                    return Err(GraphError::SubstitutionConflict { node: old, first, second: new });
                }
                _ => {
                    map.insert(old, new);
                }
            }
        }

        let before = registry.count();
        let outputs = substitution::clone_with_replacements(registry, &self.outputs, &map)?;
        tracing::debug!(
            replacements = map.len(),
            cloned = registry.count() - before,
            "replaced variables"
        );
        Self::new(registry, outputs)
    }

    /// Compiles a function from the inputs to the outputs that applies the
    /// graph's updates on every call. `extra_updates` are added on top and
    /// win over an annotation update of the same variable.
    pub fn to_callable(
        &self,
        registry: &Registry,
        extra_updates: Option<&IndexMap<NodeId, NodeId>>,
    ) -> Result<Function, GraphError> {
        let mut updates = self.updates.clone();
        if let Some(extra) = extra_updates {
            updates.extend(extra.iter().map(|(&k, &v)| (k, v)));
        }
        let updates: Vec<(NodeId, NodeId)> = updates.into_iter().collect();
        Function::compile(registry, &self.inputs(registry), &self.outputs, &updates)
    }

    /// Evaluates every variable that carries a role on `data`, keyed by input
    /// name, in a single call.
    ///
    /// The values are read straight from the call's results, so the registry
    /// does not grow. The graph's own updates are not applied.
    pub fn snapshot(
        &self,
        registry: &mut Registry,
        data: &HashMap<String, Tensor>,
    ) -> Result<IndexMap<NodeId, Tensor>, GraphError> {
        let role_variables = self.filter(|n| !registry.metadata(n).roles.is_empty());
        let mut function = Function::compile(registry, &self.inputs(registry), &role_variables, &[])?;
        let values = function.call_named(registry, data)?;
        Ok(role_variables.into_iter().zip(values).collect())
    }
}
