use crate::{
    arch::Register,
    block::{BlockId, Terminator},
    function::{FuncId, FunctionBody},
    global::GlobalId,
    instructions::{BinaryOp, CompareOp, Instruction},
    types::MemSize,
    values::{ParamId, Value},
    IrError, Result,
};

pub struct FunctionBuilder<'a> {
    body: &'a mut FunctionBody,
    current_block: BlockId,
    current_pc: Option<u64>,
}

impl<'a> FunctionBuilder<'a> {
    /// Starts building at the entry block of `body`.
    pub fn new(body: &'a mut FunctionBody) -> Self {
        let current_block = body.entry_block;
        Self {
            body,
            current_block,
            current_pc: None,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.body.entry_block
    }

    pub fn create_block(&mut self, address: Option<u64>) -> BlockId {
        let id = self.body.create_block();
        if let Some(block) = self.body.get_block_mut(id) {
            block.address = address;
        }
        id
    }

    pub fn switch_to_block(&mut self, block_id: BlockId) -> Result<()> {
        if self.body.get_block(block_id).is_none() {
            return Err(IrError::BuilderError(format!(
                "Block {} does not exist in function",
                block_id
            )));
        }
        self.current_block = block_id;
        Ok(())
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn set_block_address(&mut self, address: u64) {
        self.body.blocks[&self.current_block].address = Some(address);
    }

    /// Native PC recorded on every instruction emitted from now on.
    pub fn set_pc(&mut self, pc: Option<u64>) {
        self.current_pc = pc;
    }

    pub fn param(&self, index: u32) -> Value {
        Value::Param(ParamId(index))
    }

    fn push(&mut self, inst: Instruction) {
        let pc = self.current_pc;
        self.body.blocks[&self.current_block].add_instruction(inst, pc);
    }

    fn push_with_result(&mut self, make: impl FnOnce(crate::values::TempId) -> Instruction) -> Value {
        let result = self.body.new_temp();
        self.push(make(result));
        Value::Temp(result)
    }

    pub fn iconst(&mut self, value: i64) -> Value {
        self.push_with_result(|result| Instruction::Const { result, value })
    }

    pub fn read_register(&mut self, reg: Register) -> Value {
        self.push_with_result(|result| Instruction::ReadRegister { result, reg })
    }

    pub fn write_register(&mut self, reg: Register, value: Value) {
        self.push(Instruction::WriteRegister { reg, value });
    }

    pub fn state_address(&mut self, offset: u64) -> Value {
        self.push_with_result(|result| Instruction::StateAddress { result, offset })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        self.push_with_result(|result| Instruction::Binary {
            result,
            op,
            lhs,
            rhs,
        })
    }

    pub fn compare(&mut self, op: CompareOp, lhs: Value, rhs: Value) -> Value {
        self.push_with_result(|result| Instruction::Compare {
            result,
            op,
            lhs,
            rhs,
        })
    }

    pub fn load(&mut self, addr: Value, size: MemSize) -> Value {
        self.push_with_result(|result| Instruction::Load { result, addr, size })
    }

    pub fn store(&mut self, addr: Value, value: Value, size: MemSize) {
        self.push(Instruction::Store { addr, value, size });
    }

    pub fn global_address(&mut self, global: GlobalId, offset: i64) -> Value {
        self.push_with_result(|result| Instruction::GlobalAddress {
            result,
            global,
            offset,
        })
    }

    pub fn function_address(&mut self, func: FuncId) -> Value {
        self.push_with_result(|result| Instruction::FunctionAddress { result, func })
    }

    pub fn alloc_stack(&mut self, size: u64) -> Value {
        self.push_with_result(|result| Instruction::AllocStack { result, size })
    }

    pub fn call_lifted(&mut self, callee: FuncId) {
        self.push(Instruction::CallLifted { callee });
    }

    pub fn call_native(&mut self, callee: FuncId, args: Vec<Value>) -> Value {
        self.push_with_result(|result| Instruction::CallNative {
            result: Some(result),
            callee,
            args,
        })
    }

    pub fn dispatch(&mut self, handler: FuncId, target: Value) {
        self.push(Instruction::Dispatch { handler, target });
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch(&mut self, condition: Value, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            condition,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.terminate(Terminator::Return(value));
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    pub fn is_terminated(&self) -> bool {
        self.body.blocks[&self.current_block].is_terminated()
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.body.blocks[&self.current_block].set_terminator(terminator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::TempId;

    #[test]
    fn test_builder_numbers_temps_and_records_pc() {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);

        builder.set_pc(Some(0x1000));
        let a = builder.iconst(2);
        let b = builder.iconst(3);
        let sum = builder.binary(BinaryOp::Add, a, b);
        builder.set_pc(None);
        builder.ret(Some(sum));

        assert_eq!(sum, Value::Temp(TempId(2)));
        let entry = body.get_block(body.entry_block).unwrap();
        assert_eq!(entry.instructions.len(), 3);
        assert!(entry.instructions.iter().all(|i| i.pc == Some(0x1000)));
        assert!(entry.terminator.is_return());
    }

    #[test]
    fn test_switch_to_unknown_block_fails() {
        let mut body = FunctionBody::new();
        let mut builder = FunctionBuilder::new(&mut body);
        let next = builder.create_block(Some(0x1010));

        assert!(builder.switch_to_block(next).is_ok());
        assert!(builder.switch_to_block(BlockId(99)).is_err());
        assert_eq!(builder.current_block(), next);
        assert_eq!(body.get_block(next).unwrap().address, Some(0x1010));
    }
}
