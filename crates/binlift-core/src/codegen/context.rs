use cranelift_codegen::ir::{self as clif_ir};
use cranelift_module::{DataId, FuncId as ClifFuncId};
use std::collections::HashMap;

use crate::{
    block::BlockId,
    function::FuncId,
    global::GlobalId,
    values::Value,
    IrError, Result,
};

/// Object-level ids assigned to every IR function and global.
#[derive(Debug, Default)]
pub struct SymbolMap {
    pub functions: HashMap<FuncId, ClifFuncId>,
    pub data: HashMap<GlobalId, DataId>,
}

impl SymbolMap {
    pub fn function(&self, id: FuncId) -> Result<ClifFuncId> {
        self.functions
            .get(&id)
            .copied()
            .ok_or_else(|| IrError::UnknownSymbol(id.to_string()))
    }

    pub fn data(&self, id: GlobalId) -> Result<DataId> {
        self.data
            .get(&id)
            .copied()
            .ok_or_else(|| IrError::UnknownSymbol(id.to_string()))
    }
}

/// Per-function lowering state.
pub struct CodegenContext {
    pub pointer_type: clif_ir::Type,
    /// Base of the register state structure for the function being lowered.
    pub state: clif_ir::Value,
    pub values: HashMap<Value, clif_ir::Value>,
    pub blocks: HashMap<BlockId, clif_ir::Block>,
    pub returns_value: bool,
}

impl CodegenContext {
    pub fn value(&self, value: &Value) -> Result<clif_ir::Value> {
        self.values
            .get(value)
            .copied()
            .ok_or_else(|| IrError::CraneliftError(format!("Value {} was never lowered", value)))
    }

    pub fn block(&self, id: BlockId) -> Result<clif_ir::Block> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| IrError::CraneliftError(format!("Block {} was never created", id)))
    }
}
