/*! Pass infrastructure and control-flow queries over lifted code.
 *
 * Lifting stages produce straightforward, redundant code: every register access goes through the
 * state structure and every native block becomes an IR block. Passes registered with the
 * [`PassManager`] clean that up without changing what the module links against.
 */

pub mod cfg;
pub mod pass;

pub use cfg::ControlFlowGraph;
pub use pass::{Pass, PassManager, PassStatistics};
