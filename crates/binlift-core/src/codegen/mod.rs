/*! Lower lifted IR to native object code through Cranelift.
 *
 * Lifted functions keep machine registers in a state structure addressed through their first
 * parameter; native entry points and init/fini drivers allocate that structure on their own
 * stack. Data globals keep their relocations, and IR linkage maps onto object linkage so exported
 * symbols land in the symbol table under their native names.
 */

pub mod context;
pub mod lowering;
pub mod module;

pub use context::{CodegenContext, SymbolMap};
pub use lowering::{lower_instruction, lower_terminator};
pub use module::{object_linkage, ObjectEmitter};
