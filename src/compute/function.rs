//! Compiled callables carrying an update contract.
use crate::compute::bytecode::{Compiler, Program, Source};
use crate::compute::engine::Engine;
use crate::compute::ledger::{ComputationError, Ledger};
use crate::error::GraphError;
use crate::store::{NodeId, Registry, Tensor};
use std::collections::HashMap;

/// A program bound to its argument list, outputs and the update rules that
/// are written back to shared variables after every call.
#[derive(Debug, Clone)]
pub struct Function {
    program: Program,
    arguments: Vec<NodeId>,
    argument_names: Vec<Option<String>>,
    outputs: Vec<NodeId>,
    updates: Vec<(NodeId, NodeId)>,
    invocations: u64,
}

impl Function {
    /// Compiles `outputs` and every update expression as functions of
    /// `arguments`. Update targets must be shared variables.
    pub fn compile(
        registry: &Registry,
        arguments: &[NodeId],
        outputs: &[NodeId],
        updates: &[(NodeId, NodeId)],
    ) -> Result<Self, GraphError> {
        for &id in arguments.iter().chain(outputs) {
            registry.check(id)?;
        }
        for &(variable, expression) in updates {
            registry.check(variable)?;
            registry.check(expression)?;
            if !registry.is_shared(variable) {
                return Err(GraphError::NotShared(variable));
            }
        }

        let targets: Vec<NodeId> = outputs
            .iter()
            .copied()
            .chain(updates.iter().map(|&(_, expression)| expression))
            .collect();
        let program = Compiler::new(registry).compile(arguments, &targets)?;

        tracing::debug!(
            instructions = program.instructions.len(),
            leaves = program.loads.len(),
            updates = updates.len(),
            "compiled function"
        );

        Ok(Self {
            program,
            arguments: arguments.to_vec(),
            argument_names: arguments.iter().map(|&a| registry.name(a).map(str::to_owned)).collect(),
            outputs: outputs.to_vec(),
            updates: updates.to_vec(),
            invocations: 0,
        })
    }

    pub fn arguments(&self) -> &[NodeId] { &self.arguments }
    pub fn outputs(&self) -> &[NodeId] { &self.outputs }
    pub fn updates(&self) -> &[(NodeId, NodeId)] { &self.updates }
    pub fn invocations(&self) -> u64 { self.invocations }

    /// Evaluates the outputs for positional `inputs`, then writes every update
    /// value back to its shared variable. All update values are computed from
    /// the state at the start of the call before any is written.
    pub fn call(&mut self, registry: &mut Registry, inputs: &[Tensor]) -> Result<Vec<Tensor>, GraphError> {
        if inputs.len() != self.arguments.len() {
            return Err(ComputationError::InputCountMismatch {
                expected: self.arguments.len(),
                actual: inputs.len(),
            }
            .into());
        }
        tracing::trace!(invocation = self.invocations, "calling function");

        let mut ledger = Ledger::with_slots(self.program.slot_count());
        for load in &self.program.loads {
            let value = match &load.source {
                Source::Argument(pos) => inputs[*pos].clone(),
                Source::Constant(tensor) => tensor.clone(),
                Source::Shared(node) => registry.value(*node).cloned().ok_or_else(|| ComputationError::Mismatch {
                    msg: format!("shared variable {:?} has no value", node),
                })?,
            };
            ledger.insert(load.slot as usize, value);
        }

        Engine::run(&self.program, &mut ledger, self.invocations)?;

        let outputs = self
            .outputs
            .iter()
            .map(|&node| self.read(&ledger, node))
            .collect::<Result<Vec<_>, _>>()?;
        let new_values = self
            .updates
            .iter()
            .map(|&(variable, expression)| Ok((variable, self.read(&ledger, expression)?)))
            .collect::<Result<Vec<_>, ComputationError>>()?;
        for (variable, value) in new_values {
            registry.set_value(variable, value)?;
        }

        self.invocations += 1;
        Ok(outputs)
    }

    /// Like `call`, with arguments looked up by input name.
    pub fn call_named(&mut self, registry: &mut Registry, data: &HashMap<String, Tensor>) -> Result<Vec<Tensor>, GraphError> {
        let mut inputs = Vec::with_capacity(self.arguments.len());
        for (node, name) in self.arguments.iter().zip(&self.argument_names) {
            let value = name.as_ref().and_then(|n| data.get(n)).ok_or_else(|| GraphError::MissingInput {
                name: name.clone().unwrap_or_else(|| format!("{:?}", node)),
            })?;
            inputs.push(value.clone());
        }
        self.call(registry, &inputs)
    }

    fn read(&self, ledger: &Ledger, node: NodeId) -> Result<Tensor, ComputationError> {
        self.program
            .slot_of(node)
            .and_then(|slot| ledger.get(slot))
            .cloned()
            .ok_or_else(|| ComputationError::Mismatch { msg: format!("no value computed for {:?}", node) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NodeMetadata, Operation};

    #[test]
    fn test_updates_see_pre_call_state() {
        let mut reg = Registry::new();
        let a = reg.add_shared(Tensor::scalar(1.0), NodeMetadata::named("a"));
        let b = reg.add_shared(Tensor::scalar(10.0), NodeMetadata::named("b"));
        let sum = reg.apply(Operation::Add, &[a, b]).unwrap();

        // Swap a and b; each update reads the old value of the other.
        let mut f = Function::compile(&reg, &[], &[sum], &[(a, b), (b, a)]).unwrap();
        let out = f.call(&mut reg, &[]).unwrap();
        assert_eq!(out[0].item(), Some(11.0));
        assert_eq!(reg.value(a).and_then(Tensor::item), Some(10.0));
        assert_eq!(reg.value(b).and_then(Tensor::item), Some(1.0));
        assert_eq!(f.invocations(), 1);
    }

    #[test]
    fn test_call_named_reports_missing_input() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.apply(Operation::Square, &[x]).unwrap();
        let mut f = Function::compile(&reg, &[x], &[y], &[]).unwrap();

        let err = f.call_named(&mut reg, &HashMap::new()).unwrap_err();
        assert_eq!(err, GraphError::MissingInput { name: "x".into() });

        let data = HashMap::from([("x".to_string(), Tensor::vector(vec![2.0, 3.0]))]);
        let out = f.call_named(&mut reg, &data).unwrap();
        assert_eq!(out[0].data(), &[4.0, 9.0]);
    }

    #[test]
    fn test_wrong_argument_count() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let mut f = Function::compile(&reg, &[x], &[x], &[]).unwrap();
        let err = f.call(&mut reg, &[]).unwrap_err();
        assert_eq!(err, GraphError::Computation(ComputationError::InputCountMismatch { expected: 1, actual: 0 }));
    }

    #[test]
    fn test_update_target_must_be_shared() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let err = Function::compile(&reg, &[x], &[x], &[(x, x)]).unwrap_err();
        assert_eq!(err, GraphError::NotShared(x));
    }
}
