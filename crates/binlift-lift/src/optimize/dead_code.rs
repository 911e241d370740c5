use std::collections::HashSet;

use anyhow::Result;
use binlift_core::analysis::Pass;
use binlift_core::{FunctionBody, Instruction, Module, TempId};

/// Removes instructions whose results are never used and that have no other effect.
///
/// Calls with an unused result are kept; only the result is dropped.
#[derive(Debug, Default)]
pub struct DeadCodeElimination {
    pub removed: usize,
}

fn used_temps(body: &FunctionBody) -> HashSet<TempId> {
    body.blocks
        .values()
        .flat_map(|block| {
            block
                .instructions
                .iter()
                .flat_map(|d| d.inst.operands())
                .chain(block.terminator.operands())
        })
        .filter_map(|v| v.as_temp())
        .collect()
}

impl DeadCodeElimination {
    fn run_on_body(&mut self, body: &mut FunctionBody) -> bool {
        let mut changed = false;
        loop {
            let used = used_temps(body);
            let mut removed_any = false;

            for block in body.blocks.values_mut() {
                let before = block.instructions.len();
                block.instructions.retain(|d| match d.inst.result() {
                    Some(result) => used.contains(&result) || d.inst.has_side_effects(),
                    None => true,
                });
                let removed = before - block.instructions.len();
                if removed > 0 {
                    self.removed += removed;
                    removed_any = true;
                }

                for data in block.instructions.iter_mut() {
                    if let Instruction::CallNative { result, .. } = &mut data.inst {
                        if let Some(t) = *result {
                            if !used.contains(&t) {
                                *result = None;
                                changed = true;
                            }
                        }
                    }
                }
            }

            if !removed_any {
                break;
            }
            changed = true;
        }
        changed
    }
}

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes unused side-effect-free instructions"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for (_, function) in module.functions_mut() {
            if let Some(body) = function.body.as_mut() {
                changed |= self.run_on_body(body);
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

#[cfg(test)]
mod tests {
    use super::*;
    use binlift_core::{Arch, BinaryOp, FuncId, FunctionBuilder};

    #[test]
    fn test_unused_chain_is_removed() {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);
        let a = builder.iconst(1);
        let b = builder.iconst(2);
        builder.binary(BinaryOp::Add, a, b);
        let rax = Arch::X86_64.register("rax").unwrap();
        builder.read_register(rax);
        builder.ret(None);

        let mut pass = DeadCodeElimination::default();
        assert!(pass.run_on_body(&mut body));
        assert_eq!(pass.removed, 4);
        assert_eq!(body.instruction_count(), 0);
    }

    #[test]
    fn test_native_call_result_is_dropped_but_call_kept() {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);
        builder.call_native(FuncId::from_u32(0), Vec::new());
        builder.ret(None);

        let mut pass = DeadCodeElimination::default();
        assert!(pass.run_on_body(&mut body));
        assert!(!pass.run_on_body(&mut body));
        let insts = &body.blocks[&body.entry_block].instructions;
        assert!(matches!(
            insts.as_slice(),
            [d] if matches!(d.inst, Instruction::CallNative { result: None, .. })
        ));
    }
}
