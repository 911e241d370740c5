use cranelift::codegen::ir::types as clif_types;
use serde::{Deserialize, Serialize};
use std::fmt;

/// IR value and storage types.
///
/// Lifted code is register-machine code, so the set is small: fixed-width
/// integers, an opaque pointer and byte arrays for data globals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    Ptr,
    Array(Box<Type>, u64),
}

impl Type {
    pub fn bytes(len: u64) -> Self {
        Type::Array(Box::new(Type::I8), len)
    }

    pub fn to_cranelift(&self, pointer_type: clif_types::Type) -> Option<clif_types::Type> {
        match self {
            Type::I8 => Some(clif_types::I8),
            Type::I16 => Some(clif_types::I16),
            Type::I32 => Some(clif_types::I32),
            Type::I64 => Some(clif_types::I64),
            Type::Ptr => Some(pointer_type),
            Type::Array(_, _) => None,
        }
    }

    pub fn size_bytes(&self, pointer_size: u64) -> u64 {
        match self {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 => 8,
            Type::Ptr => pointer_size,
            Type::Array(elem, len) => elem.size_bytes(pointer_size) * len,
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Type::Array(_, _))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
        }
    }
}

/// Width of a memory access. Loads zero-extend to 64 bits, stores truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemSize {
    Byte,
    Half,
    Word,
    Quad,
}

impl MemSize {
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(MemSize::Byte),
            2 => Some(MemSize::Half),
            4 => Some(MemSize::Word),
            8 => Some(MemSize::Quad),
            _ => None,
        }
    }

    pub fn bytes(self) -> u8 {
        match self {
            MemSize::Byte => 1,
            MemSize::Half => 2,
            MemSize::Word => 4,
            MemSize::Quad => 8,
        }
    }

    pub fn ty(self) -> Type {
        match self {
            MemSize::Byte => Type::I8,
            MemSize::Half => Type::I16,
            MemSize::Word => Type::I32,
            MemSize::Quad => Type::I64,
        }
    }
}

impl Default for MemSize {
    fn default() -> Self {
        MemSize::Quad
    }
}
