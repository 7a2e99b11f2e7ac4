//! Finds every node taking part in computing a set of outputs, plus the
//! auxiliary nodes and update rules their annotations contribute.

use crate::analysis::topology;
use crate::annotation::AnnotationId;
use crate::error::GraphError;
use crate::store::{NodeId, Registry};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub variables: Vec<NodeId>,
    pub updates: IndexMap<NodeId, NodeId>,
}

/// Collects the variables and merged updates of the graph ending in `outputs`.
///
/// Variables come in dependency order: the inputs of the sorted apply nodes
/// first, then any output not already listed. Each annotation store reached
/// from those nodes is read once; its auxiliary nodes follow the node that
/// carries it, skipping anything already listed.
pub fn discover(registry: &Registry, outputs: &[NodeId]) -> Result<Discovery, GraphError> {
    for &output in outputs {
        registry.check(output)?;
    }

    // 1. Main path
    let sorted = topology::sorted_apply_nodes(registry, outputs);
    let mut main_path: IndexSet<NodeId> = IndexSet::new();
    for &node in &sorted {
        main_path.extend(registry.get_parents(node).iter().copied());
    }
    main_path.extend(outputs.iter().copied());

    // 2. Annotations, in main path order
    let mut scheduled: HashSet<NodeId> = main_path.iter().copied().collect();
    let mut visited: HashSet<AnnotationId> = HashSet::new();
    let mut variables = Vec::with_capacity(main_path.len());
    let mut updates = IndexMap::new();

    for &node in &main_path {
        variables.push(node);
        for &id in registry.attachments(node) {
            if !visited.insert(id) {
                continue;
            }
            let annotation = registry.annotation(id).ok_or(GraphError::UnknownAnnotation(id))?;
            variables.extend(
                annotation
                    .auxiliary_variables
                    .iter()
                    .copied()
                    .filter(|&aux| scheduled.insert(aux)),
            );
            merge_updates(&mut updates, &annotation.updates)?;
        }
    }

    tracing::debug!(
        outputs = outputs.len(),
        variables = variables.len(),
        annotations = visited.len(),
        updates = updates.len(),
        "discovered computation graph"
    );

    Ok(Discovery { variables, updates })
}

/// Adds `incoming` to `merged`. Mapping a variable a second time to the same
/// expression is a no-op; mapping it to a different one is an error.
pub fn merge_updates(
    merged: &mut IndexMap<NodeId, NodeId>,
    incoming: &IndexMap<NodeId, NodeId>,
) -> Result<(), GraphError> {
    for (&variable, &expression) in incoming {
        match merged.get(&variable) {
            Some(&existing) if existing != expression => {
                return Err(GraphError::UpdateCollision { variable, existing, incoming: expression });
            }
            Some(_) => {}
            None => {
                merged.insert(variable, expression);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationKind;
    use crate::store::{NodeMetadata, Operation, Tensor};

    #[test]
    fn test_main_path_is_deduplicated() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.apply(Operation::Square, &[x]).unwrap();
        let z = reg.apply(Operation::Add, &[y, x]).unwrap();

        // `y` is both an output and an ancestor of `z`.
        let found = discover(&reg, &[y, z]).unwrap();
        assert_eq!(found.variables, vec![x, y, z]);
    }

    #[test]
    fn test_root_output_alone() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        assert_eq!(discover(&reg, &[x]).unwrap().variables, vec![x]);
    }

    #[test]
    fn test_shared_annotation_read_once() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let w = reg.add_shared(Tensor::scalar(0.0), NodeMetadata::named("W"));
        let y = reg.apply(Operation::Multiply, &[x, w]).unwrap();
        let aux = reg.apply(Operation::Square, &[w]).unwrap();
        let step = reg.apply(Operation::Add, &[w, x]).unwrap();

        let brick = reg.create_annotation(AnnotationKind::BRICK);
        reg.add_auxiliary_variable(brick, aux, &[], Some("w_norm")).unwrap();
        reg.add_update(brick, w, step).unwrap();
        reg.attach_annotation(x, brick).unwrap();
        reg.attach_annotation(y, brick).unwrap();

        let found = discover(&reg, &[y]).unwrap();
        assert_eq!(found.variables, vec![x, aux, w, y]);
        assert_eq!(found.updates.get(&w), Some(&step));
    }

    #[test]
    fn test_auxiliary_on_main_path_not_repeated() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let h = reg.apply(Operation::Exp, &[x]).unwrap();
        let y = reg.apply(Operation::Sum, &[h]).unwrap();

        let call = reg.create_annotation(AnnotationKind::APPLICATION_CALL);
        reg.add_auxiliary_variable(call, h, &[], None).unwrap();
        reg.attach_annotation(x, call).unwrap();

        let found = discover(&reg, &[y]).unwrap();
        assert_eq!(found.variables, vec![x, h, y]);
    }

    #[test]
    fn test_conflicting_updates_collide() {
        let mut merged = IndexMap::from([(NodeId(0), NodeId(1))]);
        merge_updates(&mut merged, &IndexMap::from([(NodeId(0), NodeId(1))])).unwrap();
        assert_eq!(merged.len(), 1);

        let err = merge_updates(&mut merged, &IndexMap::from([(NodeId(0), NodeId(2))])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UpdateCollision { variable: NodeId(0), existing: NodeId(1), incoming: NodeId(2) }
        );
    }
}
