use std::collections::HashMap;

use anyhow::Result;
use binlift_core::analysis::Pass;
use binlift_core::{BasicBlock, Instruction, InstructionData, Module, Register, Value};

/// Forwards register values inside a block.
///
/// A read of a register whose value is already known in the block is replaced by that value, and
/// a write that is overwritten before anything could observe it is dropped. Anything that may
/// look at the state behind the block's back (calls, dispatch, stores) ends what is known.
#[derive(Debug, Default)]
pub struct RegisterForwarding {
    pub forwarded_reads: usize,
    pub removed_writes: usize,
}

impl RegisterForwarding {
    fn run_on_block(&mut self, block: &mut BasicBlock) -> bool {
        let mut known: HashMap<Register, Value> = HashMap::new();
        let mut pending_writes: HashMap<Register, usize> = HashMap::new();
        let mut substitutions: HashMap<Value, Value> = HashMap::new();
        let mut kept: Vec<Option<InstructionData>> = Vec::with_capacity(block.instructions.len());
        let mut changed = false;

        for mut data in std::mem::take(&mut block.instructions) {
            data.inst
                .map_operands(|v| substitutions.get(&v).copied().unwrap_or(v));

            match data.inst {
                Instruction::ReadRegister { result, reg } => {
                    if let Some(&value) = known.get(&reg) {
                        substitutions.insert(Value::Temp(result), value);
                        self.forwarded_reads += 1;
                        changed = true;
                        continue;
                    }
                    known.insert(reg, Value::Temp(result));
                }
                Instruction::WriteRegister { reg, value } => {
                    if known.get(&reg) == Some(&value) {
                        self.removed_writes += 1;
                        changed = true;
                        continue;
                    }
                    if let Some(previous) = pending_writes.insert(reg, kept.len()) {
                        kept[previous] = None;
                        self.removed_writes += 1;
                        changed = true;
                    }
                    known.insert(reg, value);
                }
                ref inst if inst.clobbers_state() => {
                    known.clear();
                    pending_writes.clear();
                }
                _ => {}
            }
            kept.push(Some(data));
        }

        block.instructions = kept.into_iter().flatten().collect();
        block
            .terminator
            .map_operands(|v| substitutions.get(&v).copied().unwrap_or(v));
        changed
    }
}

impl Pass for RegisterForwarding {
    fn name(&self) -> &'static str {
        "register-forwarding"
    }

    fn description(&self) -> &'static str {
        "Forwards known register values within a block and drops overwritten writes"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for (_, function) in module.functions_mut() {
            let Some(body) = function.body.as_mut() else {
                continue;
            };
            for block in body.blocks.values_mut() {
                changed |= self.run_on_block(block);
            }
        }
        Ok(changed)
    }

    fn modifies_ir(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
