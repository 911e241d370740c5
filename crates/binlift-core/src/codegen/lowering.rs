use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types;
use cranelift_codegen::ir::{self as clif_ir, InstBuilder, MemFlags, StackSlotData, StackSlotKind};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::Module as ClifModule;
use cranelift_object::ObjectModule;

use super::context::{CodegenContext, SymbolMap};
use crate::{
    arch::Arch,
    block::Terminator,
    instructions::{BinaryOp, CompareOp, Instruction},
    types::MemSize,
    values::Value,
    Result,
};

pub struct LoweringEnv<'m> {
    pub object: &'m mut ObjectModule,
    pub symbols: &'m SymbolMap,
    pub arch: Arch,
}

pub fn lower_instruction(
    inst: &Instruction,
    ctx: &mut CodegenContext,
    builder: &mut FunctionBuilder,
    env: &mut LoweringEnv,
) -> Result<()> {
    match inst {
        Instruction::Const { result, value } => {
            let res = builder.ins().iconst(types::I64, *value);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::ReadRegister { result, reg } => {
            let offset = env.arch.register_offset(*reg) as i32;
            let res = builder
                .ins()
                .load(types::I64, MemFlags::trusted(), ctx.state, offset);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::WriteRegister { reg, value } => {
            let offset = env.arch.register_offset(*reg) as i32;
            let value = ctx.value(value)?;
            builder
                .ins()
                .store(MemFlags::trusted(), value, ctx.state, offset);
        }
        Instruction::StateAddress { result, offset } => {
            let res = builder.ins().iadd_imm(ctx.state, *offset as i64);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        } => {
            let lhs = ctx.value(lhs)?;
            let rhs = ctx.value(rhs)?;
            let res = lower_binary(builder, *op, lhs, rhs);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::Compare {
            result,
            op,
            lhs,
            rhs,
        } => {
            let lhs = ctx.value(lhs)?;
            let rhs = ctx.value(rhs)?;
            let flag = builder.ins().icmp(int_cc(*op), lhs, rhs);
            let res = builder.ins().uextend(types::I64, flag);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::Load { result, addr, size } => {
            let addr = ctx.value(addr)?;
            let flags = MemFlags::new();
            let res = match size {
                MemSize::Byte => builder.ins().uload8(types::I64, flags, addr, 0),
                MemSize::Half => builder.ins().uload16(types::I64, flags, addr, 0),
                MemSize::Word => builder.ins().uload32(flags, addr, 0),
                MemSize::Quad => builder.ins().load(types::I64, flags, addr, 0),
            };
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::Store { addr, value, size } => {
            let addr = ctx.value(addr)?;
            let value = ctx.value(value)?;
            let flags = MemFlags::new();
            match size {
                MemSize::Byte => builder.ins().istore8(flags, value, addr, 0),
                MemSize::Half => builder.ins().istore16(flags, value, addr, 0),
                MemSize::Word => builder.ins().istore32(flags, value, addr, 0),
                MemSize::Quad => builder.ins().store(flags, value, addr, 0),
            };
        }
        Instruction::GlobalAddress {
            result,
            global,
            offset,
        } => {
            let data_id = env.symbols.data(*global)?;
            let gv = env.object.declare_data_in_func(data_id, builder.func);
            let base = builder.ins().global_value(ctx.pointer_type, gv);
            let res = if *offset == 0 {
                base
            } else {
                builder.ins().iadd_imm(base, *offset)
            };
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::FunctionAddress { result, func } => {
            let func_id = env.symbols.function(*func)?;
            let func_ref = env.object.declare_func_in_func(func_id, builder.func);
            let res = builder.ins().func_addr(ctx.pointer_type, func_ref);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::AllocStack { result, size } => {
            let slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                *size as u32,
                4,
            ));
            let base = builder.ins().stack_addr(ctx.pointer_type, slot, 0);
            let res = builder.ins().iadd_imm(base, *size as i64);
            ctx.values.insert(Value::Temp(*result), res);
        }
        Instruction::CallLifted { callee } => {
            let func_id = env.symbols.function(*callee)?;
            let func_ref = env.object.declare_func_in_func(func_id, builder.func);
            builder.ins().call(func_ref, &[ctx.state]);
        }
        Instruction::CallNative {
            result,
            callee,
            args,
        } => {
            let func_id = env.symbols.function(*callee)?;
            let func_ref = env.object.declare_func_in_func(func_id, builder.func);
            let args = args
                .iter()
                .map(|arg| ctx.value(arg))
                .collect::<Result<Vec<_>>>()?;
            let call = builder.ins().call(func_ref, &args);
            if let Some(result) = result {
                let first = builder.inst_results(call).first().copied();
                let res = match first {
                    Some(value) => value,
                    None => builder.ins().iconst(types::I64, 0),
                };
                ctx.values.insert(Value::Temp(*result), res);
            }
        }
        Instruction::Dispatch { handler, target } => {
            let func_id = env.symbols.function(*handler)?;
            let func_ref = env.object.declare_func_in_func(func_id, builder.func);
            let target = ctx.value(target)?;
            builder.ins().call(func_ref, &[ctx.state, target]);
        }
    }
    Ok(())
}

pub fn lower_terminator(
    term: &Terminator,
    ctx: &CodegenContext,
    builder: &mut FunctionBuilder,
) -> Result<()> {
    match term {
        Terminator::Jump(block_id) => {
            let block = ctx.block(*block_id)?;
            builder.ins().jump(block, &[]);
        }
        Terminator::Branch {
            condition,
            then_block,
            else_block,
        } => {
            let cond = ctx.value(condition)?;
            let then_dest = ctx.block(*then_block)?;
            let else_dest = ctx.block(*else_block)?;
            builder.ins().brif(cond, then_dest, &[], else_dest, &[]);
        }
        Terminator::Return(value) => {
            if ctx.returns_value {
                let val = match value {
                    Some(v) => ctx.value(v)?,
                    None => builder.ins().iconst(types::I64, 0),
                };
                builder.ins().return_(&[val]);
            } else {
                builder.ins().return_(&[]);
            }
        }
        Terminator::Unreachable => {
            builder.ins().trap(clif_ir::TrapCode::unwrap_user(1));
        }
        Terminator::Invalid => {
            builder.ins().trap(clif_ir::TrapCode::unwrap_user(2));
        }
    }
    Ok(())
}

fn lower_binary(
    builder: &mut FunctionBuilder,
    op: BinaryOp,
    lhs: clif_ir::Value,
    rhs: clif_ir::Value,
) -> clif_ir::Value {
    let ins = builder.ins();
    match op {
        BinaryOp::Add => ins.iadd(lhs, rhs),
        BinaryOp::Sub => ins.isub(lhs, rhs),
        BinaryOp::Mul => ins.imul(lhs, rhs),
        BinaryOp::UDiv => ins.udiv(lhs, rhs),
        BinaryOp::SDiv => ins.sdiv(lhs, rhs),
        BinaryOp::URem => ins.urem(lhs, rhs),
        BinaryOp::SRem => ins.srem(lhs, rhs),
        BinaryOp::And => ins.band(lhs, rhs),
        BinaryOp::Or => ins.bor(lhs, rhs),
        BinaryOp::Xor => ins.bxor(lhs, rhs),
        BinaryOp::Shl => ins.ishl(lhs, rhs),
        BinaryOp::LShr => ins.ushr(lhs, rhs),
        BinaryOp::AShr => ins.sshr(lhs, rhs),
    }
}

fn int_cc(op: CompareOp) -> IntCC {
    match op {
        CompareOp::Eq => IntCC::Equal,
        CompareOp::Ne => IntCC::NotEqual,
        CompareOp::Ult => IntCC::UnsignedLessThan,
        CompareOp::Ule => IntCC::UnsignedLessThanOrEqual,
        CompareOp::Ugt => IntCC::UnsignedGreaterThan,
        CompareOp::Uge => IntCC::UnsignedGreaterThanOrEqual,
        CompareOp::Slt => IntCC::SignedLessThan,
        CompareOp::Sle => IntCC::SignedLessThanOrEqual,
        CompareOp::Sgt => IntCC::SignedGreaterThan,
        CompareOp::Sge => IntCC::SignedGreaterThanOrEqual,
    }
}
