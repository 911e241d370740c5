/*! Lift a recovered native program into binlift IR.
 *
 * CFG recovery hands over functions, blocks and data keyed by native address. The stages here
 * turn that into a single IR module: imports are declared, every function gets a shell, data
 * segments become globals, bodies are translated instruction by instruction, and selected
 * symbols are exported under their native names. The orchestrator in [`pipeline`] runs the stages
 * in a fixed order over one module passed by `&mut`.
 */

pub mod annotate;
pub mod config;
pub mod error;
pub mod export;
pub mod external;
pub mod function;
pub mod init_fini;
pub mod legacy;
pub mod optimize;
pub mod pipeline;
pub mod segment;
pub mod semantics;

pub use config::LiftConfig;
pub use error::LiftError;
pub use function::get_native_to_lifted_entry_point;
pub use pipeline::{lift, lift_code_into_module};

/// Reports a broken stage invariant and aborts the lift.
///
/// Earlier stages guarantee what later ones look up, so a miss here is a bug in the pipeline or
/// an input that skipped validation, not something a caller can recover from.
#[track_caller]
pub(crate) fn fatal(message: String) -> ! {
    tracing::error!("{}", message);
    panic!("{}", message)
}
