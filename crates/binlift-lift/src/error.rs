use binlift_core::{CfgError, IrError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiftError {
    #[error("Unsupported instruction `{mnemonic}` at {ea:#x} in {function}")]
    UnsupportedInstruction {
        function: String,
        ea: u64,
        mnemonic: String,
    },

    #[error("Branch at {ea:#x} in {function} targets {target:#x}, which is not a block of the function")]
    BadBranchTarget {
        function: String,
        ea: u64,
        target: u64,
    },

    #[error("Conditional branch at {ea:#x} in {function} has no fall-through successor")]
    MissingFallthrough { function: String, ea: u64 },

    #[error("Call at {ea:#x} in {function} targets {target:#x}, which is neither a function nor an import")]
    BadCallTarget {
        function: String,
        ea: u64,
        target: u64,
    },

    #[error("Unknown register `{register}` at {ea:#x} in {function}")]
    UnknownRegister {
        function: String,
        ea: u64,
        register: String,
    },

    #[error("Reference to {target:#x} at {ea:#x} in {function} resolves to no symbol")]
    UnresolvedReference {
        function: String,
        ea: u64,
        target: u64,
    },

    #[error("Invalid {size}-byte memory access at {ea:#x} in {function}")]
    InvalidAccessSize { function: String, ea: u64, size: u8 },

    #[error("Function {function} has no block at its entry address {ea:#x}")]
    MissingEntryBlock { function: String, ea: u64 },

    #[error("Module targets {module}, recovered program targets {program}")]
    TargetMismatch { module: String, program: String },

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] CfgError),

    #[error("IR error: {0}")]
    Ir(#[from] IrError),
}
