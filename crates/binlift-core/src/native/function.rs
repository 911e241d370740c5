use crate::instructions::{BinaryOp, CompareOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical internal name of the lifted function recovered at `ea`.
pub fn lifted_function_name(ea: u64) -> String {
    format!("sub_{:x}", ea)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeFunction {
    pub ea: u64,
    /// Original symbol name; empty when the binary carries none.
    pub name: String,
    pub lifted_name: String,
    pub blocks: BTreeMap<u64, NativeBlock>,
}

impl NativeFunction {
    pub fn new(ea: u64, name: impl Into<String>) -> Self {
        Self {
            ea,
            name: name.into(),
            lifted_name: lifted_function_name(ea),
            blocks: BTreeMap::new(),
        }
    }

    pub fn with_block(mut self, block: NativeBlock) -> Self {
        self.blocks.insert(block.ea, block);
        self
    }

    pub fn entry_block(&self) -> Option<&NativeBlock> {
        self.blocks.get(&self.ea)
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// The native name when present, the lifted name otherwise. Used in diagnostics.
    pub fn display_name(&self) -> &str {
        if self.has_name() {
            &self.name
        } else {
            &self.lifted_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeBlock {
    #[serde(with = "super::address")]
    pub ea: u64,
    pub instructions: Vec<NativeInstruction>,
    /// Addresses control may reach after the block, fall-through included.
    #[serde(default, with = "super::address::list")]
    pub successors: Vec<u64>,
}

impl NativeBlock {
    pub fn new(ea: u64) -> Self {
        Self {
            ea,
            instructions: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn with_instruction(mut self, ea: u64, operation: Operation) -> Self {
        self.instructions.push(NativeInstruction::new(ea, operation));
        self
    }

    pub fn with_successor(mut self, ea: u64) -> Self {
        self.successors.push(ea);
        self
    }

    /// First successor that is not `taken`; the fall-through edge of a conditional branch.
    pub fn fallthrough(&self, taken: u64) -> Option<u64> {
        self.successors.iter().copied().find(|&s| s != taken)
    }
}

/// One recovered machine instruction, already decoded into a semantic operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeInstruction {
    #[serde(with = "super::address")]
    pub ea: u64,
    #[serde(default, with = "super::hex_bytes")]
    pub bytes: Vec<u8>,
    #[serde(flatten)]
    pub operation: Operation,
}

impl NativeInstruction {
    pub fn new(ea: u64, operation: Operation) -> Self {
        Self {
            ea,
            bytes: Vec::new(),
            operation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Imm(i64),
    Reg(String),
}

impl Operand {
    pub fn reg(name: impl Into<String>) -> Self {
        Operand::Reg(name.into())
    }
}

/// `[base + index * scale + disp]`. Without a base or index the displacement is an absolute
/// native address and must resolve to a known symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemOperand {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: u8,
    #[serde(default)]
    pub disp: i64,
}

fn default_scale() -> u8 {
    1
}

impl MemOperand {
    pub fn absolute(address: u64) -> Self {
        Self {
            base: None,
            index: None,
            scale: 1,
            disp: address as i64,
        }
    }

    pub fn based(base: impl Into<String>, disp: i64) -> Self {
        Self {
            base: Some(base.into()),
            index: None,
            scale: 1,
            disp,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.base.is_none() && self.index.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Nop,
    Mov {
        dst: String,
        src: Operand,
    },
    Binary {
        kind: BinaryOp,
        dst: String,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        kind: CompareOp,
        dst: String,
        lhs: Operand,
        rhs: Operand,
    },
    Load {
        dst: String,
        addr: MemOperand,
        #[serde(default = "default_access_size")]
        size: u8,
    },
    Store {
        src: Operand,
        addr: MemOperand,
        #[serde(default = "default_access_size")]
        size: u8,
    },
    /// Materializes the address of a code or data symbol.
    LoadAddress {
        dst: String,
        #[serde(with = "super::address")]
        target: u64,
    },
    Call {
        #[serde(with = "super::address")]
        target: u64,
    },
    CallIndirect {
        target: Operand,
    },
    Jump {
        #[serde(with = "super::address")]
        target: u64,
    },
    JumpIndirect {
        target: Operand,
    },
    /// Jumps to `target` when `condition` holds a non-zero value.
    Branch {
        condition: String,
        #[serde(with = "super::address")]
        target: u64,
    },
    Return,
    /// An instruction the recovery layer decoded but the semantics table does not cover.
    Unsupported {
        mnemonic: String,
    },
}

fn default_access_size() -> u8 {
    8
}

impl Operation {
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            Operation::Jump { .. }
                | Operation::JumpIndirect { .. }
                | Operation::Branch { .. }
                | Operation::Return
        )
    }
}
