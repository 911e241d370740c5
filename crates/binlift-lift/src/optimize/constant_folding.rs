use std::collections::HashMap;

use anyhow::Result;
use binlift_core::analysis::Pass;
use binlift_core::{BasicBlock, Instruction, Module, TempId, Terminator, Value};

/// Folds arithmetic and comparisons on constants, and branches on constant conditions.
#[derive(Debug, Default)]
pub struct ConstantFolding {
    pub folded: usize,
}

impl ConstantFolding {
    fn run_on_block(&mut self, block: &mut BasicBlock) -> bool {
        let mut constants: HashMap<TempId, i64> = HashMap::new();
        let mut changed = false;
        let constant = |constants: &HashMap<TempId, i64>, value: Value| {
            value.as_temp().and_then(|t| constants.get(&t).copied())
        };

        for data in block.instructions.iter_mut() {
            let folded = match &data.inst {
                Instruction::Const { result, value } => {
                    constants.insert(*result, *value);
                    None
                }
                Instruction::Binary { result, op, lhs, rhs } => {
                    match (constant(&constants, *lhs), constant(&constants, *rhs)) {
                        (Some(l), Some(r)) => op.fold(l, r).map(|v| (*result, v)),
                        _ => None,
                    }
                }
                Instruction::Compare { result, op, lhs, rhs } => {
                    match (constant(&constants, *lhs), constant(&constants, *rhs)) {
                        (Some(l), Some(r)) => Some((*result, op.fold(l, r))),
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some((result, value)) = folded {
                data.inst = Instruction::Const { result, value };
                constants.insert(result, value);
                self.folded += 1;
                changed = true;
            }
        }

        if let Terminator::Branch {
            condition,
            then_block,
            else_block,
        } = block.terminator
        {
            if let Some(cond) = constant(&constants, condition) {
                let target = if cond != 0 { then_block } else { else_block };
                block.terminator = Terminator::Jump(target);
                self.folded += 1;
                changed = true;
            }
        }

        changed
    }
}

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn description(&self) -> &'static str {
        "Folds constant arithmetic, comparisons and branches"
    }

    fn run_on_module(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;
        for (_, function) in module.functions_mut() {
            if let Some(body) = function.body.as_mut() {
                for block in body.blocks.values_mut() {
                    changed |= self.run_on_block(block);
                }
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
