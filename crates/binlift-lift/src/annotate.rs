/*! Per-instruction native PC annotations.
 *
 * Optimization merges and drops instructions, so a bare `pc` is not present on everything that
 * survives. Propagation gives every instruction of every defined function an annotation: its own
 * PC when it has one, otherwise the PC of the closest instruction before it in the block, and at
 * the top of a block the block's native address.
 */

use binlift_core::Module;
use tracing::debug;

pub fn propagate_inst_annotations(module: &mut Module, tag: &str) {
    let mut annotated = 0usize;
    for (_, function) in module.functions_mut() {
        let Some(body) = function.body.as_mut() else {
            continue;
        };
        for block in body.blocks.values_mut() {
            let mut current = block.address;
            for data in block.instructions.iter_mut() {
                current = data.pc.or(current);
                data.annotation = current;
                annotated += 1;
            }
        }
    }
    module.metadata.annotation_channel = Some(tag.to_string());
    debug!("Annotated {} instructions under {}", annotated, tag);
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlift_core::{
        Arch, Function, FunctionBody, FunctionBuilder, FunctionKind, OperatingSystem, Signature,
    };

    fn module() -> Module {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);
        builder.set_block_address(0x1000);
        builder.iconst(0);
        builder.set_pc(Some(0x1004));
        builder.iconst(1);
        builder.set_pc(None);
        builder.iconst(2);
        builder.ret(None);

        let mut module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        let mut function = Function::new("sub_1000", Signature::lifted(), FunctionKind::Lifted);
        function.body = Some(body);
        module.declare_function(function).unwrap();
        module
    }

    fn annotations(module: &Module) -> Vec<Option<u64>> {
        let id = module.get_function("sub_1000").unwrap();
        let body = module.function(id).body.as_ref().unwrap();
        body.blocks[&body.entry_block]
            .instructions
            .iter()
            .map(|d| d.annotation)
            .collect()
    }

    #[test]
    fn test_annotations_fall_back_to_preceding_pc() {
        let mut module = module();
        propagate_inst_annotations(&mut module, "pc");

        assert_eq!(
            annotations(&module),
            vec![Some(0x1000), Some(0x1004), Some(0x1004)]
        );
        assert_eq!(module.metadata.annotation_channel.as_deref(), Some("pc"));
    }

    #[test]
    fn test_propagation_is_idempotent() {
        let mut module = module();
        propagate_inst_annotations(&mut module, "pc");
        let once = annotations(&module);
        propagate_inst_annotations(&mut module, "pc");
        assert_eq!(annotations(&module), once);
    }
}
