/*! Instruction semantics: one recovered operation at a time.
 *
 * Each native operation becomes a short sequence of IR instructions over the register state.
 * Registers are read and written through the state structure every time; the optimizer removes
 * the redundancy afterwards. Control flow maps onto the block layout of the function being
 * defined, and transfers that leave the function become calls into other lifted code.
 */

use std::collections::HashMap;

use binlift_core::arch::Arch;
use binlift_core::native::{MemOperand, NativeBlock, NativeFunction, NativeInstruction, Operand, Operation};
use binlift_core::{
    BinaryOp, BlockId, FuncId, Function, FunctionBuilder, FunctionKind, Linkage, MemSize, Module,
    NativeModule, Register, Signature, SymbolRef, Type, Value,
};

use crate::error::LiftError;
use crate::external::{import_at, imported_variable_at};
use crate::fatal;
use crate::function::get_native_to_lifted_entry_point;

/// Runtime routine resolving indirect calls and jumps: `(state, target) -> ()`.
pub const DISPATCH_INTRINSIC: &str = "__binlift_dispatch";

/// What the instruction translator needs to know about the function being defined.
pub struct LiftContext<'a> {
    pub cfg: &'a NativeModule,
    pub module: &'a mut Module,
    pub function: &'a NativeFunction,
    /// IR block of every native block of `function`.
    pub blocks: HashMap<u64, BlockId>,
}

impl<'a> LiftContext<'a> {
    fn arch(&self) -> Arch {
        self.module.arch()
    }

    fn name(&self) -> String {
        self.function.display_name().to_string()
    }

    fn register(&self, name: &str, ea: u64) -> Result<Register, LiftError> {
        self.arch()
            .register(name)
            .ok_or_else(|| LiftError::UnknownRegister {
                function: self.name(),
                ea,
                register: name.to_string(),
            })
    }

    /// The lifted function recovered at `ea`, if `ea` is a function entry.
    fn lifted_function_at(&self, ea: u64) -> Option<FuncId> {
        let func = self.cfg.ea_to_func.get(&ea)?;
        match self.module.get_function(&func.lifted_name) {
            Some(id) => Some(id),
            None => fatal(format!(
                "Lifted function {} has no declaration",
                func.lifted_name
            )),
        }
    }

    fn dispatch_intrinsic(&mut self) -> FuncId {
        match self.module.lookup(DISPATCH_INTRINSIC) {
            Some(SymbolRef::Function(id))
                if self.module.function(id).kind == FunctionKind::Intrinsic =>
            {
                id
            }
            Some(_) => fatal(format!(
                "{} is already defined by the program",
                DISPATCH_INTRINSIC
            )),
            None => {
                let intrinsic = Function::new(
                    DISPATCH_INTRINSIC,
                    Signature::new(vec![Type::Ptr, Type::I64], Vec::new()),
                    FunctionKind::Intrinsic,
                )
                .with_linkage(Linkage::External);
                match self.module.declare_function(intrinsic) {
                    Ok(id) => id,
                    Err(e) => fatal(format!("Cannot declare {}: {}", DISPATCH_INTRINSIC, e)),
                }
            }
        }
    }

    fn operand(&self, builder: &mut FunctionBuilder, operand: &Operand, ea: u64) -> Result<Value, LiftError> {
        match operand {
            Operand::Imm(value) => Ok(builder.iconst(*value)),
            Operand::Reg(name) => {
                let reg = self.register(name, ea)?;
                Ok(builder.read_register(reg))
            }
        }
    }

    fn access_size(&self, size: u8, ea: u64) -> Result<MemSize, LiftError> {
        MemSize::from_bytes(size).ok_or_else(|| LiftError::InvalidAccessSize {
            function: self.name(),
            ea,
            size,
        })
    }

    fn unresolved(&self, ea: u64, target: u64) -> LiftError {
        LiftError::UnresolvedReference {
            function: self.name(),
            ea,
            target,
        }
    }

    /// Effective address of a memory operand.
    fn address(&self, builder: &mut FunctionBuilder, mem: &MemOperand, ea: u64) -> Result<Value, LiftError> {
        if mem.is_absolute() {
            let target = mem.disp as u64;
            if let Some((global, offset)) = self.module.global_containing(target) {
                return Ok(builder.global_address(global, offset as i64));
            }
            if let Some(global) = imported_variable_at(self.cfg, &*self.module, target) {
                return Ok(builder.global_address(global, 0));
            }
            return Err(self.unresolved(ea, target));
        }

        let mut addr = match &mem.base {
            Some(base) => {
                let reg = self.register(base, ea)?;
                Some(builder.read_register(reg))
            }
            None => None,
        };
        if let Some(index) = &mem.index {
            let reg = self.register(index, ea)?;
            let mut scaled = builder.read_register(reg);
            if mem.scale > 1 {
                let scale = builder.iconst(mem.scale as i64);
                scaled = builder.binary(BinaryOp::Mul, scaled, scale);
            }
            addr = Some(match addr {
                Some(base) => builder.binary(BinaryOp::Add, base, scaled),
                None => scaled,
            });
        }

        let mut addr = match addr {
            Some(addr) => addr,
            None => builder.iconst(0),
        };
        if mem.disp != 0 {
            let disp = builder.iconst(mem.disp);
            addr = builder.binary(BinaryOp::Add, addr, disp);
        }
        Ok(addr)
    }

    /// Leaves the function through a tail call into `callee`.
    fn tail_call(&self, builder: &mut FunctionBuilder, callee: FuncId) {
        builder.call_lifted(callee);
        builder.ret(None);
    }

    fn call_import(&self, builder: &mut FunctionBuilder, import: FuncId) {
        let arch = self.arch();
        let arg_regs = arch.argument_registers(self.module.os());
        let num_args = self.module.function(import).signature.params.len();
        let args = arg_regs
            .iter()
            .take(num_args)
            .map(|&reg| builder.read_register(reg))
            .collect();
        let result = builder.call_native(import, args);
        builder.write_register(arch.return_register(), result);
    }

    /// Emits the control transfer ending a block whose instructions fell off its end.
    pub fn fall_through(&self, builder: &mut FunctionBuilder, block: &NativeBlock) -> Result<(), LiftError> {
        let Some(&next) = block.successors.first() else {
            builder.unreachable();
            return Ok(());
        };
        if let Some(&target) = self.blocks.get(&next) {
            builder.jump(target);
        } else if let Some(callee) = self.lifted_function_at(next) {
            self.tail_call(builder, callee);
        } else {
            let ea = block.instructions.last().map(|i| i.ea).unwrap_or(block.ea);
            return Err(LiftError::BadBranchTarget {
                function: self.name(),
                ea,
                target: next,
            });
        }
        Ok(())
    }
}

/// Translates one native instruction at the builder's current position.
pub fn lift_instruction(
    ctx: &mut LiftContext,
    builder: &mut FunctionBuilder,
    block: &NativeBlock,
    inst: &NativeInstruction,
) -> Result<(), LiftError> {
    let ea = inst.ea;
    match &inst.operation {
        Operation::Nop => {}

        Operation::Mov { dst, src } => {
            let dst = ctx.register(dst, ea)?;
            let value = ctx.operand(builder, src, ea)?;
            builder.write_register(dst, value);
        }

        Operation::Binary { kind, dst, lhs, rhs } => {
            let dst = ctx.register(dst, ea)?;
            let lhs = ctx.operand(builder, lhs, ea)?;
            let rhs = ctx.operand(builder, rhs, ea)?;
            let value = builder.binary(*kind, lhs, rhs);
            builder.write_register(dst, value);
        }

        Operation::Compare { kind, dst, lhs, rhs } => {
            let dst = ctx.register(dst, ea)?;
            let lhs = ctx.operand(builder, lhs, ea)?;
            let rhs = ctx.operand(builder, rhs, ea)?;
            let value = builder.compare(*kind, lhs, rhs);
            builder.write_register(dst, value);
        }

        Operation::Load { dst, addr, size } => {
            let dst = ctx.register(dst, ea)?;
            let size = ctx.access_size(*size, ea)?;
            let addr = ctx.address(builder, addr, ea)?;
            let value = builder.load(addr, size);
            builder.write_register(dst, value);
        }

        Operation::Store { src, addr, size } => {
            let size = ctx.access_size(*size, ea)?;
            let value = ctx.operand(builder, src, ea)?;
            let addr = ctx.address(builder, addr, ea)?;
            builder.store(addr, value, size);
        }

        Operation::LoadAddress { dst, target } => {
            let dst = ctx.register(dst, ea)?;
            let value = if let Some(func) = ctx.cfg.ea_to_func.get(target) {
                let entry = get_native_to_lifted_entry_point(ctx.cfg, func, ctx.module);
                builder.function_address(entry)
            } else if let Some(import) = import_at(ctx.cfg, &*ctx.module, *target) {
                builder.function_address(import)
            } else if let Some((global, offset)) = ctx.module.global_containing(*target) {
                builder.global_address(global, offset as i64)
            } else if let Some(global) = imported_variable_at(ctx.cfg, &*ctx.module, *target) {
                builder.global_address(global, 0)
            } else {
                return Err(ctx.unresolved(ea, *target));
            };
            builder.write_register(dst, value);
        }

        Operation::Call { target } => {
            if let Some(callee) = ctx.lifted_function_at(*target) {
                builder.call_lifted(callee);
            } else if let Some(import) = import_at(ctx.cfg, &*ctx.module, *target) {
                ctx.call_import(builder, import);
            } else {
                return Err(LiftError::BadCallTarget {
                    function: ctx.name(),
                    ea,
                    target: *target,
                });
            }
        }

        Operation::CallIndirect { target } => {
            let target = ctx.operand(builder, target, ea)?;
            let handler = ctx.dispatch_intrinsic();
            builder.dispatch(handler, target);
        }

        Operation::Jump { target } => {
            if let Some(&block_id) = ctx.blocks.get(target) {
                builder.jump(block_id);
            } else if let Some(callee) = ctx.lifted_function_at(*target) {
                ctx.tail_call(builder, callee);
            } else {
                return Err(LiftError::BadBranchTarget {
                    function: ctx.name(),
                    ea,
                    target: *target,
                });
            }
        }

        Operation::JumpIndirect { target } => {
            let target = ctx.operand(builder, target, ea)?;
            let handler = ctx.dispatch_intrinsic();
            builder.dispatch(handler, target);
            builder.ret(None);
        }

        Operation::Branch { condition, target } => {
            let condition = ctx.register(condition, ea)?;
            let Some(&then_block) = ctx.blocks.get(target) else {
                return Err(LiftError::BadBranchTarget {
                    function: ctx.name(),
                    ea,
                    target: *target,
                });
            };
            let fallthrough = block.fallthrough(*target).ok_or_else(|| LiftError::MissingFallthrough {
                function: ctx.name(),
                ea,
            })?;
            let Some(&else_block) = ctx.blocks.get(&fallthrough) else {
                return Err(LiftError::BadBranchTarget {
                    function: ctx.name(),
                    ea,
                    target: fallthrough,
                });
            };
            let value = builder.read_register(condition);
            builder.branch(value, then_block, else_block);
        }

        Operation::Return => builder.ret(None),

        Operation::Unsupported { mnemonic } => {
            return Err(LiftError::UnsupportedInstruction {
                function: ctx.name(),
                ea,
                mnemonic: mnemonic.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::declare_externals;
    use crate::function::declare_lifted_functions;
    use binlift_core::native::NativeExternalFunction;
    use binlift_core::{FunctionBody, Instruction, OperatingSystem, Terminator};

    fn cfg() -> NativeModule {
        let mut cfg = NativeModule::new("sem", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(
            NativeFunction::new(0x1000, "caller").with_block(NativeBlock::new(0x1000)),
        )
        .add_function(NativeFunction::new(0x2000, "").with_block(NativeBlock::new(0x2000)))
        .add_external_function(NativeExternalFunction::new(0x9000, "puts", 1));
        cfg
    }

    /// Lifts `ops` as the single block of the function at 0x1000.
    fn lift_ops(ops: Vec<Operation>) -> (Module, Result<FunctionBody, LiftError>) {
        let cfg = cfg();
        let mut module = Module::new("sem", Arch::X86_64, OperatingSystem::Linux);
        declare_externals(&cfg, &mut module);
        declare_lifted_functions(&cfg, &mut module);

        let mut native_block = NativeBlock::new(0x1000);
        for (i, op) in ops.into_iter().enumerate() {
            native_block = native_block.with_instruction(0x1000 + i as u64 * 4, op);
        }
        let function = &cfg.ea_to_func[&0x1000];

        let mut body = FunctionBody::new();
        let entry = body.entry_block;
        let result = {
            let mut ctx = LiftContext {
                cfg: &cfg,
                module: &mut module,
                function,
                blocks: HashMap::from([(0x1000, entry)]),
            };
            let mut builder = FunctionBuilder::new(&mut body);
            native_block
                .instructions
                .iter()
                .try_for_each(|inst| {
                    builder.set_pc(Some(inst.ea));
                    lift_instruction(&mut ctx, &mut builder, &native_block, inst)
                })
        };
        (module, result.map(|_| body))
    }

    fn insts(body: &FunctionBody) -> Vec<Instruction> {
        body.blocks[&body.entry_block]
            .instructions
            .iter()
            .map(|d| d.inst.clone())
            .collect()
    }

    #[test]
    fn test_mov_immediate_writes_register() {
        let (_, body) = lift_ops(vec![Operation::Mov {
            dst: "rax".into(),
            src: Operand::Imm(42),
        }]);
        let body = body.unwrap();
        let insts = insts(&body);
        assert!(matches!(insts[0], Instruction::Const { value: 42, .. }));
        assert!(matches!(
            insts[1],
            Instruction::WriteRegister { reg, .. } if reg == Arch::X86_64.return_register()
        ));
        assert!(body.blocks[&body.entry_block]
            .instructions
            .iter()
            .all(|d| d.pc == Some(0x1000)));
    }

    #[test]
    fn test_call_to_import_goes_through_argument_registers() {
        let (module, body) = lift_ops(vec![Operation::Call { target: 0x9000 }]);
        let body = body.unwrap();
        let puts = module.get_function("puts").unwrap();
        let insts = insts(&body);
        let call = insts
            .iter()
            .find_map(|i| match i {
                Instruction::CallNative { callee, args, .. } => Some((*callee, args.len())),
                _ => None,
            })
            .unwrap();
        assert_eq!(call, (puts, 1));
        assert!(matches!(insts.last(), Some(Instruction::WriteRegister { .. })));
    }

    #[test]
    fn test_call_to_lifted_function() {
        let (module, body) = lift_ops(vec![Operation::Call { target: 0x2000 }]);
        let callee = module.get_function("sub_2000").unwrap();
        let insts = insts(&body.unwrap());
        assert!(matches!(
            insts.as_slice(),
            [Instruction::CallLifted { callee: c }] if *c == callee
        ));
    }

    #[test]
    fn test_jump_to_other_function_is_tail_call() {
        let (_, body) = lift_ops(vec![Operation::Jump { target: 0x2000 }]);
        let body = body.unwrap();
        assert!(body.blocks[&body.entry_block].terminator.is_return());
    }

    #[test]
    fn test_load_address_of_function_uses_entry_point() {
        let (module, body) = lift_ops(vec![Operation::LoadAddress {
            dst: "rdi".into(),
            target: 0x2000,
        }]);
        body.unwrap();
        let lifted = module.get_function("sub_2000").unwrap();
        let entry = module.native_entry_point(lifted).unwrap();
        assert_eq!(module.function(entry).name, "callback_sub_2000");
    }

    #[test]
    fn test_indirect_call_declares_dispatch_intrinsic_once() {
        let (module, body) = lift_ops(vec![
            Operation::CallIndirect { target: Operand::reg("rax") },
            Operation::CallIndirect { target: Operand::reg("rbx") },
        ]);
        body.unwrap();
        let dispatch = module.get_function(DISPATCH_INTRINSIC).unwrap();
        assert_eq!(module.function(dispatch).kind, FunctionKind::Intrinsic);
    }

    #[test]
    fn test_branch_without_fallthrough_fails() {
        let (_, body) = lift_ops(vec![Operation::Branch {
            condition: "zf".into(),
            target: 0x1000,
        }]);
        assert!(matches!(body, Err(LiftError::MissingFallthrough { ea: 0x1000, .. })));
    }

    #[test]
    fn test_recoverable_failures() {
        let (_, body) = lift_ops(vec![Operation::Unsupported {
            mnemonic: "vpgatherdd".into(),
        }]);
        assert!(matches!(body, Err(LiftError::UnsupportedInstruction { .. })));

        let (_, body) = lift_ops(vec![Operation::Mov {
            dst: "x0".into(),
            src: Operand::Imm(0),
        }]);
        assert!(matches!(body, Err(LiftError::UnknownRegister { .. })));

        let (_, body) = lift_ops(vec![Operation::Call { target: 0x5555 }]);
        assert!(matches!(body, Err(LiftError::BadCallTarget { target: 0x5555, .. })));

        let (_, body) = lift_ops(vec![Operation::Load {
            dst: "rax".into(),
            addr: MemOperand::absolute(0x7777),
            size: 8,
        }]);
        assert!(matches!(body, Err(LiftError::UnresolvedReference { target: 0x7777, .. })));

        let (_, body) = lift_ops(vec![Operation::Store {
            src: Operand::Imm(1),
            addr: MemOperand::based("rsp", -8),
            size: 3,
        }]);
        assert!(matches!(body, Err(LiftError::InvalidAccessSize { size: 3, .. })));
    }

    #[test]
    fn test_based_address_adds_displacement() {
        let (_, body) = lift_ops(vec![Operation::Load {
            dst: "rax".into(),
            addr: MemOperand::based("rsp", 16),
            size: 4,
        }]);
        let body = body.unwrap();
        let insts = insts(&body);
        assert!(insts.iter().any(|i| matches!(i, Instruction::Const { value: 16, .. })));
        assert!(insts
            .iter()
            .any(|i| matches!(i, Instruction::Load { size: MemSize::Word, .. })));
        assert!(matches!(body.blocks[&body.entry_block].terminator, Terminator::Invalid));
    }
}
