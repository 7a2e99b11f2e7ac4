use crate::compute::ComputationError;
use crate::store::{NodeId, Registry};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Performs a Topological Sort of the ancestors of `targets` using
/// Depth-First Search (DFS).
///
/// Returns every node the targets depend on (targets included), each one
/// placed after all of its parents.
pub fn execution_order(registry: &Registry, targets: &[NodeId]) -> Result<Vec<NodeId>, ComputationError> {
    let count = registry.count();
    let mut order = Vec::with_capacity(count);
    let mut state = vec![VisitState::None; count];

    // Edges point Child -> Parent. Post-order on this structure gives
    // [Parent, ..., Child].
    for &target in targets {
        if target.index() >= count {
            return Err(ComputationError::Mismatch { msg: format!("unknown node {:?}", target) });
        }
        if state[target.index()] == VisitState::None {
            visit(target, registry, &mut state, &mut order)?;
        }
    }

    Ok(order)
}

#[derive(Clone, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting, // Used for cycle detection
    Visited,
}

fn visit(
    node: NodeId,
    registry: &Registry,
    state: &mut Vec<VisitState>,
    order: &mut Vec<NodeId>,
) -> Result<(), ComputationError> {
    let idx = node.index();

    match state[idx] {
        VisitState::Visited => return Ok(()),
        VisitState::Visiting => return Err(ComputationError::CycleDetected),
        VisitState::None => state[idx] = VisitState::Visiting,
    }

    for &parent in registry.get_parents(node) {
        visit(parent, registry, state, order)?;
    }

    state[idx] = VisitState::Visited;
    order.push(node);
    Ok(())
}

/// Collects the ancestor subgraph of `outputs`, edges pointing from parent
/// to consumer. Node insertion order follows the traversal, so iteration
/// over the map is deterministic.
pub fn ancestor_graph(registry: &Registry, outputs: &[NodeId]) -> DiGraphMap<NodeId, ()> {
    let mut graph = DiGraphMap::new();
    let mut stack: Vec<NodeId> = outputs.iter().rev().copied().collect();

    while let Some(node) = stack.pop() {
        if graph.contains_node(node) {
            continue;
        }
        graph.add_node(node);
        for &parent in registry.get_parents(node).iter().rev() {
            stack.push(parent);
        }
    }
    for node in graph.nodes().collect::<Vec<_>>() {
        for &parent in registry.get_parents(node) {
            graph.add_edge(parent, node, ());
        }
    }
    graph
}

/// Apply nodes between the roots and `outputs`, each placed before every
/// apply node it feeds. Among nodes whose dependencies are satisfied the one
/// with the smallest `key` goes first.
pub fn sorted_apply_nodes_by<K, F>(registry: &Registry, outputs: &[NodeId], key: F) -> Vec<NodeId>
where
    K: Ord,
    F: Fn(NodeId) -> K,
{
    let graph = ancestor_graph(registry, outputs);
    let is_apply = |n: NodeId| !registry.kind(n).is_root();

    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    let mut ready = BinaryHeap::new();
    for node in graph.nodes().filter(|&n| is_apply(n)) {
        let degree = graph
            .neighbors_directed(node, Direction::Incoming)
            .filter(|&p| is_apply(p))
            .count();
        in_degree.insert(node, degree);
        if degree == 0 {
            ready.push(Reverse((key(node), node)));
        }
    }

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse((_, node))) = ready.pop() {
        order.push(node);
        for child in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((key(child), child)));
                }
            }
        }
    }
    order
}

/// `sorted_apply_nodes_by` with construction order as the tie-break.
pub fn sorted_apply_nodes(registry: &Registry, outputs: &[NodeId]) -> Vec<NodeId> {
    sorted_apply_nodes_by(registry, outputs, |n| n)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NodeMetadata, Operation, Tensor};

    fn make_meta(name: &str) -> NodeMetadata {
        NodeMetadata::named(name)
    }

    #[test]
    fn test_sort_diamond_dependency() {
        // Shape: A -> B, A -> C, B+C -> D
        let mut reg = Registry::new();
        let a = reg.add_constant(Tensor::scalar(1.0), make_meta("A"));
        let b = reg.add_apply(Operation::Add, &[a, a], make_meta("B")).unwrap();
        let c = reg.add_apply(Operation::Add, &[a, a], make_meta("C")).unwrap();
        let d = reg.add_apply(Operation::Add, &[b, c], make_meta("D")).unwrap();

        let res = execution_order(&reg, &[d]).expect("Sort failed");

        let pos = |id: NodeId| res.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
        assert_eq!(res.len(), 4);
    }

    #[test]
    fn test_execution_order_skips_unrelated_nodes() {
        let mut reg = Registry::new();
        let x = reg.add_input(make_meta("x"));
        let unrelated = reg.add_input(make_meta("u"));
        let y = reg.add_apply(Operation::Exp, &[x], make_meta("y")).unwrap();
        let res = execution_order(&reg, &[y]).unwrap();
        assert_eq!(res, vec![x, y]);
        assert!(!res.contains(&unrelated));
    }

    #[test]
    fn test_cycle_detection_explicit() {
        // Construct A -> B. Then force B -> A via internal mutation.
        let mut reg = Registry::new();
        let a = reg.add_constant(Tensor::scalar(0.0), make_meta("A")); // ID 0
        let b = reg.add_apply(Operation::Add, &[a, a], make_meta("B")).unwrap(); // ID 1

        // A is at index 0. We verify it has no parents initially.
        assert_eq!(reg.parents_ranges[0].1, 0);

        reg.parents_flat.push(b);
        let new_start = (reg.parents_flat.len() - 1) as u32;
        reg.parents_ranges[0] = (new_start, 1);

        let err = execution_order(&reg, &[b]).unwrap_err();
        assert_eq!(err, ComputationError::CycleDetected);
    }

    #[test]
    fn test_apply_nodes_follow_construction_order_on_ties() {
        let mut reg = Registry::new();
        let x = reg.add_input(make_meta("x"));
        let p = reg.add_apply(Operation::Exp, &[x], make_meta("p")).unwrap();
        let q = reg.add_apply(Operation::Negate, &[x], make_meta("q")).unwrap();
        let r = reg.add_apply(Operation::Add, &[q, p], make_meta("r")).unwrap();

        assert_eq!(sorted_apply_nodes(&reg, &[r]), vec![p, q, r]);
        // A reversed key flips the independent pair but never the dependency.
        assert_eq!(sorted_apply_nodes_by(&reg, &[r], |n| Reverse(n)), vec![q, p, r]);
    }
}
