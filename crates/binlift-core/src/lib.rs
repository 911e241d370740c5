/*! Core IR and recovered-program model for native code lifting.
 *
 * Lifting turns recovered machine code into IR that can be optimized and compiled again. This
 * crate holds both ends of that translation: the read-only model of what CFG recovery found in a
 * binary, and the IR module the lifting stages build, together with the verifier, JSON
 * persistence and the cranelift backend that turns a finished module into an object file.
 */

pub mod analysis;
pub mod arch;
pub mod block;
pub mod builder;
pub mod codegen;
pub mod function;
pub mod global;
pub mod instructions;
pub mod ir_persist;
pub mod linkage;
pub mod module;
pub mod native;
pub mod types;
pub mod values;
pub mod verify;

pub use arch::{Arch, OperatingSystem, Register};
pub use block::{BasicBlock, BlockId, Terminator};
pub use builder::FunctionBuilder;
pub use function::{FuncId, Function, FunctionBody, FunctionKind, Signature};
pub use global::{DataContents, GlobalId, GlobalVariable, Initializer, RelocTarget, Relocation};
pub use instructions::{BinaryOp, CompareOp, Instruction, InstructionData};
pub use linkage::{Linkage, StorageClass, Visibility};
pub use module::{IrDialect, Module, ModuleMetadata, SymbolRef};
pub use native::{CfgError, NativeModule};
pub use types::{MemSize, Type};
pub use values::{ParamId, TempId, Value};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("Duplicate symbol: {0}")]
    DuplicateSymbol(String),
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Builder error: {0}")]
    BuilderError(String),
    #[error("Invalid module: {0}")]
    InvalidModule(String),
    #[error("Verification failed in {function}: {message}")]
    Verification { function: String, message: String },
    #[error("Cranelift error: {0}")]
    CraneliftError(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IrError>;

#[cfg(test)]
mod tests;
