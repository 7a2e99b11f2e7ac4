use crate::analysis::topology;
use crate::compute::ledger::ComputationError;
use crate::store::{NodeId, NodeKind, Operation, Registry, Tensor};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Where a leaf slot gets its value from at call time.
#[derive(Debug, Clone)]
pub enum Source {
    /// Position in the argument list of the call.
    Argument(usize),
    /// Current value of a shared variable, read when the call starts.
    Shared(NodeId),
    /// Captured when the program was compiled.
    Constant(Tensor),
}

#[derive(Debug, Clone)]
pub struct Load {
    pub slot: u32,
    pub source: Source,
}

/// One step of the tape. Instruction `i` always writes ledger slot `i`.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Operation,
    pub operands: SmallVec<[u32; 4]>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub loads: Vec<Load>,

    // Runtime Metadata
    pub layout: Vec<u32>,          // Map: NodeId -> StorageIndex
    pub input_start_index: usize,  // Offset where non-computed inputs begin in Ledger
}

impl Program {
    pub fn slot_count(&self) -> usize { self.input_start_index + self.loads.len() }

    pub fn slot_of(&self, node: NodeId) -> Option<usize> {
        match self.layout.get(node.index()) {
            Some(&slot) if slot != u32::MAX => Some(slot as usize),
            _ => None,
        }
    }
}

pub struct Compiler<'a> {
    registry: &'a Registry,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Compiles everything `targets` depend on into a linear program.
    ///
    /// The ledger is laid out so that slots `0..F` hold the `F` apply nodes in
    /// execution order and the leaves follow from `F`. Every `Input` leaf must
    /// appear in `arguments`.
    pub fn compile(&self, arguments: &[NodeId], targets: &[NodeId]) -> Result<Program, ComputationError> {
        let execution_order = topology::execution_order(self.registry, targets)?;
        let mut layout = vec![u32::MAX; self.registry.count()];

        let mut positions = HashMap::with_capacity(arguments.len());
        for (pos, &arg) in arguments.iter().enumerate() {
            positions.entry(arg).or_insert(pos);
        }

        // 1. Partition nodes: Formulas (Computed) vs Leaves (Loaded)
        let (formulas, leaves): (Vec<NodeId>, Vec<NodeId>) = execution_order
            .iter()
            .copied()
            .partition(|&node| !self.registry.kind(node).is_root());

        // 2. Assign Storage Indices
        for (i, &node) in formulas.iter().enumerate() {
            layout[node.index()] = i as u32;
        }
        let input_start_index = formulas.len();
        for (i, &node) in leaves.iter().enumerate() {
            layout[node.index()] = (input_start_index + i) as u32;
        }

        // 3. Resolve where each leaf comes from
        let mut loads = Vec::with_capacity(leaves.len());
        for &node in &leaves {
            let source = match self.registry.kind(node) {
                NodeKind::Input => match positions.get(&node) {
                    Some(&pos) => Source::Argument(pos),
                    None => return Err(ComputationError::UnboundInput(node)),
                },
                NodeKind::Shared(_) => Source::Shared(node),
                NodeKind::Constant(idx) => Source::Constant(self.registry.tensors[*idx as usize].clone()),
                NodeKind::Apply(_) => unreachable!("apply nodes are partitioned out"),
            };
            loads.push(Load { slot: layout[node.index()], source });
        }

        // 4. Generate Code
        let mut instructions = Vec::with_capacity(formulas.len());
        for &node in &formulas {
            if let NodeKind::Apply(op) = self.registry.kind(node) {
                let operands = self
                    .registry
                    .get_parents(node)
                    .iter()
                    .map(|p| layout[p.index()])
                    .collect();
                instructions.push(Instruction { op: op.clone(), operands });
            }
        }

        Ok(Program {
            instructions,
            loads,
            layout,
            input_start_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NodeMetadata;

    #[test]
    fn test_formulas_precede_leaves() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let w = reg.add_shared(Tensor::scalar(2.0), NodeMetadata::named("W"));
        let xw = reg.apply(Operation::Multiply, &[x, w]).unwrap();
        let out = reg.apply(Operation::Exp, &[xw]).unwrap();

        let program = Compiler::new(&reg).compile(&[x], &[out]).unwrap();
        assert_eq!(program.input_start_index, 2);
        assert_eq!(program.slot_of(xw), Some(0));
        assert_eq!(program.slot_of(out), Some(1));
        assert_eq!(program.slot_count(), 4);
        assert_eq!(program.instructions[1].operands.as_slice(), &[0]);
        assert!(matches!(program.loads[0].source, Source::Argument(0)));
        assert!(matches!(program.loads[1].source, Source::Shared(n) if n == w));
    }

    #[test]
    fn test_unbound_input_is_reported() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.add_input(NodeMetadata::named("y"));
        let z = reg.apply(Operation::Add, &[x, y]).unwrap();

        let err = Compiler::new(&reg).compile(&[x], &[z]).unwrap_err();
        assert_eq!(err, ComputationError::UnboundInput(y));
    }
}
