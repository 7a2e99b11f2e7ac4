use crate::compute::bytecode::Program;
use crate::compute::kernel;
use crate::compute::ledger::{ComputationError, Ledger};
use crate::store::Tensor;
use smallvec::SmallVec;

pub struct Engine;

impl Engine {
    /// Executes the bytecode program against the provided ledger.
    ///
    /// Leaf slots must already be filled. `invocation` seeds the random
    /// streams of this run.
    pub fn run(program: &Program, ledger: &mut Ledger, invocation: u64) -> Result<(), ComputationError> {
        // 1. Validate Memory Layout once, so the hot loop can index freely.
        Self::validate_memory_layout(program, ledger)?;

        // 2. Hot Loop
        for (i, instruction) in program.instructions.iter().enumerate() {
            let result = {
                let mut args: SmallVec<[&Tensor; 4]> = SmallVec::with_capacity(instruction.operands.len());
                for &slot in &instruction.operands {
                    let value = ledger.get(slot as usize).ok_or_else(|| ComputationError::Mismatch {
                        msg: format!("instruction {} reads empty slot {}", i, slot),
                    })?;
                    args.push(value);
                }
                kernel::execute_instruction(&instruction.op, &args, invocation)?
            };
            ledger.insert(i, result);
        }

        Ok(())
    }

    /// Performs comprehensive bounds checking before execution starts.
    fn validate_memory_layout(program: &Program, ledger: &Ledger) -> Result<(), ComputationError> {
        let slot_count = program.slot_count();

        // 1. Buffer Size Check
        if ledger.len() < slot_count {
            return Err(ComputationError::Mismatch {
                msg: format!("Ledger too small. Needed {} slots, got {}", slot_count, ledger.len()),
            });
        }

        // 2. Ordering Check: an instruction may only read leaves or the
        // results of earlier instructions.
        for (i, instruction) in program.instructions.iter().enumerate() {
            for &slot in &instruction.operands {
                let slot = slot as usize;
                let computed_earlier = slot < i;
                let is_leaf = slot >= program.input_start_index && slot < slot_count;
                if !computed_earlier && !is_leaf {
                    return Err(ComputationError::Mismatch {
                        msg: format!("instruction {} reads slot {} out of order", i, slot),
                    });
                }
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::bytecode::{Instruction, Load, Source};
    use crate::store::Operation;
    use smallvec::smallvec;

    // Mock setup helper: `ops_count` additions of the single leaf.
    fn make_dummy_program(ops_count: usize) -> Program {
        let leaf = ops_count as u32;
        Program {
            instructions: (0..ops_count)
                .map(|_| Instruction { op: Operation::Add, operands: smallvec![leaf, leaf] })
                .collect(),
            loads: vec![Load { slot: leaf, source: Source::Argument(0) }],
            layout: vec![],
            input_start_index: ops_count,
        }
    }

    #[test]
    fn test_engine_detects_small_ledger() {
        let program = make_dummy_program(5);
        // Room for the instructions but not the leaf.
        let mut ledger = Ledger::with_slots(5);

        let result = Engine::run(&program, &mut ledger, 0);
        match result.unwrap_err() {
            ComputationError::Mismatch { msg } => assert!(msg.contains("Ledger too small")),
            other => panic!("Wrong error type: {:?}", other),
        }
    }

    #[test]
    fn test_engine_detects_forward_reads() {
        let mut program = make_dummy_program(2);
        program.instructions[0].operands = smallvec![1, 2];
        let mut ledger = Ledger::with_slots(3);
        ledger.insert(2, Tensor::scalar(1.0));

        let err = Engine::run(&program, &mut ledger, 0).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_engine_runs_chain() {
        let program = make_dummy_program(2);
        let mut ledger = Ledger::with_slots(3);
        ledger.insert(2, Tensor::scalar(1.5));

        Engine::run(&program, &mut ledger, 0).unwrap();
        assert_eq!(ledger.get(0).and_then(Tensor::item), Some(3.0));
        assert_eq!(ledger.get(1).and_then(Tensor::item), Some(3.0));
    }
}
