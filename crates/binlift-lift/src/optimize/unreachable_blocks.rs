use anyhow::Result;
use binlift_core::analysis::{ControlFlowGraph, Pass};
use binlift_core::{FunctionBody, Module};

/// Deletes blocks no path from the entry block reaches.
#[derive(Debug, Default)]
pub struct UnreachableBlockElimination {
    pub removed: usize,
}

impl UnreachableBlockElimination {
    fn run_on_body(&mut self, body: &mut FunctionBody) -> bool {
        let reachable = ControlFlowGraph::from_function(body).reachable_blocks();
        let entry = body.entry_block;
        let before = body.blocks.len();
        body.blocks
            .retain(|id, _| *id == entry || reachable.contains(id));
        let removed = before - body.blocks.len();
        self.removed += removed;
        removed > 0
    }
}

impl Pass for UnreachableBlockElimination {
    fn name(&self) -> &'static str {
        "unreachable-block-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes blocks unreachable from the entry block"
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
    use binlift_core::FunctionBuilder;

    #[test]
    fn test_orphan_blocks_are_removed_in_order() {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);
        let orphan = builder.create_block(Some(0x1010));
        let exit = builder.create_block(Some(0x1020));
        builder.jump(exit);
        builder.switch_to_block(orphan).unwrap();
        builder.jump(exit);
        builder.switch_to_block(exit).unwrap();
        builder.ret(None);

        let mut pass = UnreachableBlockElimination::default();
        assert!(pass.run_on_body(&mut body));
        assert_eq!(
            body.blocks.keys().copied().collect::<Vec<_>>(),
            vec![body.entry_block, exit]
        );
        assert!(!pass.run_on_body(&mut body));
    }
}
