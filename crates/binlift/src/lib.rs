/*! Unified interface for lifting recovered native code into IR.
 *
 * One import for the whole pipeline: load a recovered module description, lift it, then print
 * the result or compile it to an object file.
 */

pub use binlift_core as core;
pub use binlift_emit as emit;
pub use binlift_lift as lift;

pub use binlift_core::{
    native::load_native_module, Arch, BasicBlock, BlockId, CfgError, FuncId, Function,
    GlobalId, GlobalVariable, Instruction, Linkage, Module, NativeModule, OperatingSystem,
    StorageClass, Terminator, Value, Visibility,
};

pub use binlift_core::codegen::ObjectEmitter;

pub use binlift_emit::{emit_json, EmitterConfig, IrEmitter};

pub use binlift_lift::{lift_code_into_module, LiftConfig, LiftError};

/// Lifts `cfg` into a fresh module; see [`binlift_lift::lift`].
pub fn lift_module(cfg: &NativeModule, config: &LiftConfig) -> Result<Module, LiftError> {
    binlift_lift::lift(cfg, config)
}
