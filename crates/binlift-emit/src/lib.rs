/*! Turn lifted IR back into something a person can read.
 *
 * Lifted code is easiest to check against the disassembly it came from. The text emitter prints
 * every symbol with its linkage, every data global with its relocations and every instruction
 * with register names, and can tag each instruction with the native PC it was lifted from.
 */

pub mod config;
pub mod emitter;
pub mod ir_emitter;
pub mod ir_formatter_base;

pub use config::{EmitterConfig, IndentStyle, VerbosityLevel};
pub use emitter::{EmitContext, EmitHelper, EmitResult, Emitter};
pub use ir_emitter::{emit_json, IrEmitter};
pub use ir_formatter_base::IrFormatterBase;
