use crate::arch::Register;
use crate::function::FuncId;
use crate::global::GlobalId;
use crate::types::MemSize;
use crate::values::{TempId, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Instruction {
    Const {
        result: TempId,
        value: i64,
    },

    ReadRegister {
        result: TempId,
        reg: Register,
    },
    WriteRegister {
        reg: Register,
        value: Value,
    },
    /// Address of a byte offset inside the current function's state structure.
    StateAddress {
        result: TempId,
        offset: u64,
    },

    Binary {
        result: TempId,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Compare {
        result: TempId,
        op: CompareOp,
        lhs: Value,
        rhs: Value,
    },

    Load {
        result: TempId,
        addr: Value,
        size: MemSize,
    },
    Store {
        addr: Value,
        value: Value,
        size: MemSize,
    },

    GlobalAddress {
        result: TempId,
        global: GlobalId,
        offset: i64,
    },
    FunctionAddress {
        result: TempId,
        func: FuncId,
    },
    /// Reserves a fresh stack region and yields the address one past its end.
    AllocStack {
        result: TempId,
        size: u64,
    },

    /// Calls a lifted function, handing over the current state.
    CallLifted {
        callee: FuncId,
    },
    /// Calls a function with the native calling convention.
    CallNative {
        result: Option<TempId>,
        callee: FuncId,
        args: Vec<Value>,
    },
    /// Indirect control transfer resolved at run time by `handler(state, target)`.
    Dispatch {
        handler: FuncId,
        target: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    /// Constant-folds the operation with wrapping 64-bit semantics. Division by zero and
    /// oversized shifts are left to run time.
    pub fn fold(self, lhs: i64, rhs: i64) -> Option<i64> {
        let (ul, ur) = (lhs as u64, rhs as u64);
        let value = match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::UDiv => ul.checked_div(ur)? as i64,
            BinaryOp::SDiv => lhs.checked_div(rhs)?,
            BinaryOp::URem => ul.checked_rem(ur)? as i64,
            BinaryOp::SRem => lhs.checked_rem(rhs)?,
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::Shl if ur < 64 => (ul << ur) as i64,
            BinaryOp::LShr if ur < 64 => (ul >> ur) as i64,
            BinaryOp::AShr if ur < 64 => lhs >> ur,
            BinaryOp::Shl | BinaryOp::LShr | BinaryOp::AShr => return None,
        };
        Some(value)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::URem => "urem",
            BinaryOp::SRem => "srem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CompareOp {
    pub fn fold(self, lhs: i64, rhs: i64) -> i64 {
        let (ul, ur) = (lhs as u64, rhs as u64);
        let holds = match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Ult => ul < ur,
            CompareOp::Ule => ul <= ur,
            CompareOp::Ugt => ul > ur,
            CompareOp::Uge => ul >= ur,
            CompareOp::Slt => lhs < rhs,
            CompareOp::Sle => lhs <= rhs,
            CompareOp::Sgt => lhs > rhs,
            CompareOp::Sge => lhs >= rhs,
        };
        holds as i64
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Ult => "ult",
            CompareOp::Ule => "ule",
            CompareOp::Ugt => "ugt",
            CompareOp::Uge => "uge",
            CompareOp::Slt => "slt",
            CompareOp::Sle => "sle",
            CompareOp::Sgt => "sgt",
            CompareOp::Sge => "sge",
        }
    }
}

impl Instruction {
    pub fn result(&self) -> Option<TempId> {
        match self {
            Instruction::Const { result, .. }
            | Instruction::ReadRegister { result, .. }
            | Instruction::StateAddress { result, .. }
            | Instruction::Binary { result, .. }
            | Instruction::Compare { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::GlobalAddress { result, .. }
            | Instruction::FunctionAddress { result, .. }
            | Instruction::AllocStack { result, .. } => Some(*result),
            Instruction::CallNative { result, .. } => *result,
            Instruction::WriteRegister { .. }
            | Instruction::Store { .. }
            | Instruction::CallLifted { .. }
            | Instruction::Dispatch { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            Instruction::WriteRegister { value, .. } => vec![*value],
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::Load { addr, .. } => vec![*addr],
            Instruction::Store { addr, value, .. } => vec![*addr, *value],
            Instruction::CallNative { args, .. } => args.clone(),
            Instruction::Dispatch { target, .. } => vec![*target],
            Instruction::Const { .. }
            | Instruction::ReadRegister { .. }
            | Instruction::StateAddress { .. }
            | Instruction::GlobalAddress { .. }
            | Instruction::FunctionAddress { .. }
            | Instruction::AllocStack { .. }
            | Instruction::CallLifted { .. } => Vec::new(),
        }
    }

    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Instruction::WriteRegister { value, .. } => *value = f(*value),
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            Instruction::Load { addr, .. } => *addr = f(*addr),
            Instruction::Store { addr, value, .. } => {
                *addr = f(*addr);
                *value = f(*value);
            }
            Instruction::CallNative { args, .. } => {
                for arg in args.iter_mut() {
                    *arg = f(*arg);
                }
            }
            Instruction::Dispatch { target, .. } => *target = f(*target),
            _ => {}
        }
    }

    /// Whether removing the instruction could change observable behavior, even when its
    /// result is unused. Loads count: they may fault.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Instruction::WriteRegister { .. }
                | Instruction::Load { .. }
                | Instruction::Store { .. }
                | Instruction::AllocStack { .. }
                | Instruction::CallLifted { .. }
                | Instruction::CallNative { .. }
                | Instruction::Dispatch { .. }
        )
    }

    /// Whether the instruction may read or write register state behind the function's back.
    pub fn clobbers_state(&self) -> bool {
        matches!(
            self,
            Instruction::CallLifted { .. }
                | Instruction::Dispatch { .. }
                | Instruction::Store { .. }
                | Instruction::CallNative { .. }
        )
    }

    pub fn referenced_function(&self) -> Option<FuncId> {
        match self {
            Instruction::FunctionAddress { func, .. } => Some(*func),
            Instruction::CallLifted { callee } => Some(*callee),
            Instruction::CallNative { callee, .. } => Some(*callee),
            Instruction::Dispatch { handler, .. } => Some(*handler),
            _ => None,
        }
    }

    pub fn referenced_global(&self) -> Option<GlobalId> {
        match self {
            Instruction::GlobalAddress { global, .. } => Some(*global),
            _ => None,
        }
    }
}

/// An instruction together with where it came from.
///
/// `pc` is the address of the native instruction it was lifted from. `annotation` is filled in
/// by annotation propagation and survives optimization even when `pc` alone would not say
/// which native instruction an optimized sequence belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionData {
    pub inst: Instruction,
    pub pc: Option<u64>,
    pub annotation: Option<u64>,
}

impl InstructionData {
    pub fn new(inst: Instruction, pc: Option<u64>) -> Self {
        Self {
            inst,
            pc,
            annotation: None,
        }
    }
}

impl From<Instruction> for InstructionData {
    fn from(inst: Instruction) -> Self {
        Self::new(inst, None)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
