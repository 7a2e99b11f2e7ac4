//! Clone-with-substitution over the node store.

use super::topology;
use crate::error::GraphError;
use crate::store::{NodeId, NodeKind, NodeMetadata, Registry};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Rebuilds the graph reachable from `outputs` with every key of
/// `replacements` swapped for its value, all at once.
///
/// Apply nodes whose inputs change are re-created and keep the metadata and
/// annotations of the node they stand in for; untouched nodes are shared with
/// the original graph. Replacement values are used as-is, so a value may
/// depend on the very node it replaces. Returns the new outputs in order.
pub fn clone_with_replacements(
    registry: &mut Registry,
    outputs: &[NodeId],
    replacements: &IndexMap<NodeId, NodeId>,
) -> Result<Vec<NodeId>, GraphError> {
    for (&key, &value) in replacements {
        registry.check(key)?;
        registry.check(value)?;
    }
    let order = topology::execution_order(registry, outputs)?;
    let mut mapped: HashMap<NodeId, NodeId> = HashMap::new();

    for node in order {
        if let Some(&value) = replacements.get(&node) {
            mapped.insert(node, value);
            continue;
        }
        let op = match registry.kind(node) {
            NodeKind::Apply(op) => op.clone(),
            _ => continue,
        };
        let parents = registry.get_parents(node);
        let new_parents: SmallVec<[NodeId; 4]> = parents
            .iter()
            .map(|p| mapped.get(p).copied().unwrap_or(*p))
            .collect();
        if new_parents.as_slice() != parents {
            let clone = registry.push_node(NodeKind::Apply(op), &new_parents, NodeMetadata::default());
            registry.copy_tag(node, clone);
            mapped.insert(node, clone);
        }
    }

    Ok(outputs.iter().map(|o| mapped.get(o).copied().unwrap_or(*o)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationKind;
    use crate::store::{Operation, Role};

    #[test]
    fn test_untouched_branches_are_shared() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.add_input(NodeMetadata::named("y"));
        let ex = reg.apply(Operation::Exp, &[x]).unwrap();
        let ey = reg.apply(Operation::Exp, &[y]).unwrap();
        let out = reg.add_apply(Operation::Add, &[ex, ey], NodeMetadata::named("out")).unwrap();
        let r = reg.add_input(NodeMetadata::named("r"));

        let mut replacements = IndexMap::new();
        replacements.insert(y, r);
        let before = reg.count();
        let new_outputs = clone_with_replacements(&mut reg, &[out], &replacements).unwrap();

        // Only `exp(y)` and `out` are rebuilt.
        assert_eq!(reg.count(), before + 2);
        let new_out = new_outputs[0];
        assert_ne!(new_out, out);
        assert_eq!(reg.name(new_out), Some("out"));
        assert_eq!(reg.get_parents(new_out)[0], ex);
        assert_eq!(reg.get_parents(reg.get_parents(new_out)[1]), &[r]);
        // The original graph is untouched.
        assert_eq!(reg.get_parents(out), &[ex, ey]);
    }

    #[test]
    fn test_replacement_may_reference_its_key() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.apply(Operation::Exp, &[x]).unwrap();
        let half = reg.literal(0.5);
        let scaled = reg.apply(Operation::Multiply, &[half, x]).unwrap();

        let mut replacements = IndexMap::new();
        replacements.insert(x, scaled);
        let new_y = clone_with_replacements(&mut reg, &[y], &replacements).unwrap()[0];
        assert_eq!(reg.get_parents(new_y), &[scaled]);
        assert_eq!(reg.get_parents(scaled), &[half, x]);
    }

    #[test]
    fn test_clones_keep_roles_and_annotations() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let h = reg.add_apply(Operation::Exp, &[x], NodeMetadata::named("h").with_role(Role::Output)).unwrap();
        let call = reg.create_annotation(AnnotationKind::APPLICATION_CALL);
        reg.attach_annotation(h, call).unwrap();
        let r = reg.add_input(NodeMetadata::named("r"));

        let mut replacements = IndexMap::new();
        replacements.insert(x, r);
        let new_h = clone_with_replacements(&mut reg, &[h], &replacements).unwrap()[0];
        assert!(reg.has_role(new_h, Role::Output));
        assert_eq!(reg.attachments(new_h), &[call]);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let mut replacements = IndexMap::new();
        replacements.insert(NodeId(99), x);
        assert_eq!(
            clone_with_replacements(&mut reg, &[x], &replacements),
            Err(GraphError::UnknownNode(NodeId(99)))
        );
    }
}
