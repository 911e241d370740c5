/*! Lifted functions: declarations, bodies and native entry points.
 *
 * Every recovered function is declared as a bodiless shell first, so that bodies and data can
 * refer to any function regardless of address order. Bodies are defined afterwards, one native
 * block per IR block. Native code never calls a lifted function directly; it goes through a
 * synthesized entry point that sets up register state from the native calling convention.
 */

use std::collections::HashMap;

use binlift_core::arch::DEFAULT_STACK_SIZE;
use binlift_core::native::NativeFunction;
use binlift_core::{
    FuncId, Function, FunctionBody, FunctionBuilder, FunctionKind, Module, NativeModule, Signature,
};
use tracing::{debug, error};

use crate::error::LiftError;
use crate::fatal;
use crate::semantics::{lift_instruction, LiftContext};

/// Declares one bodiless lifted function per recovered function.
pub fn declare_lifted_functions(cfg: &NativeModule, module: &mut Module) {
    for func in cfg.ea_to_func.values() {
        let shell = Function::new(func.lifted_name.clone(), Signature::lifted(), FunctionKind::Lifted)
            .with_native_address(func.ea);
        if let Err(e) = module.declare_function(shell) {
            fatal(format!(
                "Cannot declare {} for function at {:#x}: {}",
                func.lifted_name, func.ea, e
            ));
        }
        debug!("Declared {} ({})", func.lifted_name, func.display_name());
    }
}

/// Returns the native-callable entry point of `cfg_func`, synthesizing it on first use.
///
/// An exported function's entry point is named after its native symbol, which `validate` has
/// checked is free. Every other entry point is `callback_<lifted name>`: local functions may share
/// a native name, lifted names never do. The entry point starts out with internal linkage. It owns
/// a fresh register state: the stack pointer is aimed at the top of a synthesized stack, native
/// arguments are copied into the argument registers, and the return register is handed back after
/// the lifted call.
pub fn get_native_to_lifted_entry_point(
    cfg: &NativeModule,
    cfg_func: &NativeFunction,
    module: &mut Module,
) -> FuncId {
    let Some(lifted) = module.get_function(&cfg_func.lifted_name) else {
        fatal(format!(
            "Lifted function {} has no declaration",
            cfg_func.lifted_name
        ));
    };
    if let Some(entry) = module.native_entry_point(lifted) {
        return entry;
    }

    let name = entry_point_name(cfg, cfg_func);

    let arch = module.arch();
    let arg_regs = arch.argument_registers(module.os());

    let mut body = FunctionBody::new();
    let mut builder = FunctionBuilder::new(&mut body);
    builder.set_block_address(cfg_func.ea);
    let stack_top = builder.alloc_stack(DEFAULT_STACK_SIZE);
    builder.write_register(arch.stack_pointer(), stack_top);
    for (i, &reg) in arg_regs.iter().enumerate() {
        let arg = builder.param(i as u32);
        builder.write_register(reg, arg);
    }
    builder.call_lifted(lifted);
    let result = builder.read_register(arch.return_register());
    builder.ret(Some(result));

    let mut entry = Function::new(
        name.clone(),
        Signature::native(arg_regs.len()),
        FunctionKind::NativeEntry { target: lifted },
    )
    .with_native_address(cfg_func.ea);
    entry.body = Some(body);

    match module.declare_function(entry) {
        Ok(id) => {
            debug!("Synthesized entry point {} for {}", name, cfg_func.lifted_name);
            id
        }
        Err(e) => fatal(format!("Cannot declare entry point {}: {}", name, e)),
    }
}

fn entry_point_name(cfg: &NativeModule, cfg_func: &NativeFunction) -> String {
    if cfg_func.has_name() && cfg.exported_funcs.contains(&cfg_func.ea) {
        cfg_func.name.clone()
    } else {
        format!("callback_{}", cfg_func.lifted_name)
    }
}

/// Defines the body of every lifted shell, in address order.
///
/// Stops at the first function that cannot be lifted. Bodies defined before the failure stay in
/// the module.
pub fn define_lifted_functions(cfg: &NativeModule, module: &mut Module) -> Result<(), LiftError> {
    for func in cfg.ea_to_func.values() {
        let Some(id) = module.get_function(&func.lifted_name) else {
            fatal(format!("Lifted function {} has no declaration", func.lifted_name));
        };

        let body = match lift_function_body(cfg, module, func) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "Failed to lift {} at {:#x}: {}",
                    func.display_name(),
                    func.ea,
                    e
                );
                return Err(e);
            }
        };

        debug!(
            "Defined {} with {} blocks, {} instructions",
            func.lifted_name,
            body.blocks.len(),
            body.instruction_count()
        );
        module.function_mut(id).body = Some(body);
    }
    Ok(())
}

fn lift_function_body(
    cfg: &NativeModule,
    module: &mut Module,
    func: &NativeFunction,
) -> Result<FunctionBody, LiftError> {
    let entry_block = func.entry_block().ok_or_else(|| LiftError::MissingEntryBlock {
        function: func.display_name().to_string(),
        ea: func.ea,
    })?;

    let mut body = FunctionBody::new();
    let mut builder = FunctionBuilder::new(&mut body);
    builder.set_block_address(entry_block.ea);

    let mut blocks = HashMap::new();
    blocks.insert(entry_block.ea, builder.entry_block());
    for block in func.blocks.values().filter(|b| b.ea != entry_block.ea) {
        blocks.insert(block.ea, builder.create_block(Some(block.ea)));
    }

    let mut ctx = LiftContext {
        cfg,
        module,
        function: func,
        blocks,
    };

    let order = std::iter::once(entry_block)
        .chain(func.blocks.values().filter(|b| b.ea != entry_block.ea));
    for block in order {
        builder.switch_to_block(ctx.blocks[&block.ea])?;
        for inst in &block.instructions {
            if builder.is_terminated() {
                break;
            }
            builder.set_pc(Some(inst.ea));
            lift_instruction(&mut ctx, &mut builder, block, inst)?;
        }
        if !builder.is_terminated() {
            ctx.fall_through(&mut builder, block)?;
        }
    }

    drop(builder);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlift_core::native::{NativeBlock, Operand, Operation};
    use binlift_core::{Arch, Instruction, Linkage, OperatingSystem, Terminator};

    fn lifted(cfg: &NativeModule) -> Module {
        let mut module = Module::new(&cfg.name, cfg.arch, cfg.os);
        declare_lifted_functions(cfg, &mut module);
        module
    }

    #[test]
    fn test_shells_are_internal_declarations() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "compute"));
        let module = lifted(&cfg);

        let id = module.get_function("sub_1000").unwrap();
        let shell = module.function(id);
        assert!(shell.is_declaration());
        assert_eq!(shell.linkage, Linkage::Internal);
        assert_eq!(shell.signature, Signature::lifted());
        assert_eq!(shell.native_address, Some(0x1000));
        assert!(module.get_function("compute").is_none());
    }

    #[test]
    fn test_entry_point_is_created_once() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "compute"))
            .export_function(0x1000);
        let mut module = lifted(&cfg);
        let func = &cfg.ea_to_func[&0x1000];

        let first = get_native_to_lifted_entry_point(&cfg, func, &mut module);
        let second = get_native_to_lifted_entry_point(&cfg, func, &mut module);
        assert_eq!(first, second);

        let entry = module.function(first);
        assert_eq!(entry.name, "compute");
        assert_eq!(entry.linkage, Linkage::Internal);
        assert_eq!(entry.signature, Signature::native(6));
        assert!(entry.owns_state());

        let body = entry.body.as_ref().unwrap();
        let insts = &body.blocks[&body.entry_block].instructions;
        assert!(matches!(insts[0].inst, Instruction::AllocStack { .. }));
        assert!(insts
            .iter()
            .any(|d| matches!(d.inst, Instruction::CallLifted { .. })));
    }

    #[test]
    fn test_unnamed_function_gets_callback_entry_point() {
        let mut cfg = NativeModule::new("m", Arch::Aarch64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x4000, ""));
        let mut module = lifted(&cfg);

        let entry = get_native_to_lifted_entry_point(&cfg, &cfg.ea_to_func[&0x4000], &mut module);
        assert_eq!(module.function(entry).name, "callback_sub_4000");
        assert_eq!(module.function(entry).signature, Signature::native(8));
    }

    #[test]
    fn test_local_entry_points_do_not_take_native_names() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "cleanup"))
            .add_function(NativeFunction::new(0x1100, "cleanup"))
            .add_function(NativeFunction::new(0x1200, "cleanup"))
            .export_function(0x1200);
        let mut module = lifted(&cfg);

        let names: Vec<String> = [0x1000, 0x1100, 0x1200]
            .iter()
            .map(|ea| {
                let entry = get_native_to_lifted_entry_point(&cfg, &cfg.ea_to_func[ea], &mut module);
                module.function(entry).name.clone()
            })
            .collect();
        assert_eq!(names, vec!["callback_sub_1000", "callback_sub_1100", "cleanup"]);
    }

    #[test]
    fn test_body_follows_native_block_layout() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(
            NativeFunction::new(0x1000, "abs")
                .with_block(
                    NativeBlock::new(0x1000)
                        .with_instruction(
                            0x1000,
                            Operation::Compare {
                                kind: binlift_core::CompareOp::Slt,
                                dst: "sf".into(),
                                lhs: Operand::reg("rdi"),
                                rhs: Operand::Imm(0),
                            },
                        )
                        .with_instruction(
                            0x1004,
                            Operation::Branch {
                                condition: "sf".into(),
                                target: 0x1010,
                            },
                        )
                        .with_successor(0x1010)
                        .with_successor(0x1008),
                )
                .with_block(
                    NativeBlock::new(0x1008)
                        .with_instruction(
                            0x1008,
                            Operation::Mov {
                                dst: "rax".into(),
                                src: Operand::reg("rdi"),
                            },
                        )
                        .with_successor(0x1014),
                )
                .with_block(
                    NativeBlock::new(0x1010)
                        .with_instruction(
                            0x1010,
                            Operation::Binary {
                                kind: binlift_core::BinaryOp::Sub,
                                dst: "rax".into(),
                                lhs: Operand::Imm(0),
                                rhs: Operand::reg("rdi"),
                            },
                        )
                        .with_successor(0x1014),
                )
                .with_block(NativeBlock::new(0x1014).with_instruction(0x1014, Operation::Return)),
        );
        let mut module = lifted(&cfg);
        define_lifted_functions(&cfg, &mut module).unwrap();
        module.verify().unwrap();

        let id = module.get_function("sub_1000").unwrap();
        let body = module.function(id).body.as_ref().unwrap();
        assert_eq!(body.blocks.len(), 4);
        assert_eq!(body.blocks[&body.entry_block].address, Some(0x1000));
        assert!(matches!(
            body.blocks[&body.entry_block].terminator,
            Terminator::Branch { .. }
        ));
        let pcs: Vec<_> = body
            .blocks
            .values()
            .flat_map(|b| b.instructions.iter().map(|d| d.pc))
            .collect();
        assert!(pcs.iter().all(Option::is_some));
    }

    #[test]
    fn test_missing_entry_block_is_an_error() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "f").with_block(NativeBlock::new(0x1004)));
        let mut module = lifted(&cfg);

        let err = define_lifted_functions(&cfg, &mut module).unwrap_err();
        assert!(matches!(err, LiftError::MissingEntryBlock { ea: 0x1000, .. }));
    }

    #[test]
    fn test_block_without_successors_is_unreachable() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(
            NativeFunction::new(0x1000, "spin")
                .with_block(NativeBlock::new(0x1000).with_instruction(0x1000, Operation::Nop)),
        );
        let mut module = lifted(&cfg);
        define_lifted_functions(&cfg, &mut module).unwrap();

        let id = module.get_function("sub_1000").unwrap();
        let body = module.function(id).body.as_ref().unwrap();
        assert!(matches!(
            body.blocks[&body.entry_block].terminator,
            Terminator::Unreachable
        ));
    }
}
