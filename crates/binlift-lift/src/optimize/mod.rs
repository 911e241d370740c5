/*! Cleanup of freshly lifted code.
 *
 * Straight translation leaves every register access going through the state structure and
 * every native block in place, reachable or not. These passes forward register values within a
 * block, fold constants, drop dead instructions and delete unreachable blocks. None of them
 * touches the symbol table: functions, globals, names and linkage are left exactly as the
 * lifting stages set them.
 */

mod constant_folding;
mod dead_code;
mod register_forwarding;
mod unreachable_blocks;

pub use constant_folding::ConstantFolding;
pub use dead_code::DeadCodeElimination;
pub use register_forwarding::RegisterForwarding;
pub use unreachable_blocks::UnreachableBlockElimination;

use binlift_core::analysis::PassManager;
use binlift_core::Module;
use tracing::debug;

use crate::fatal;

pub const DEFAULT_MAX_ROUNDS: usize = 8;

pub fn default_pass_manager() -> PassManager {
    let mut manager = PassManager::new();
    manager.register_pass(RegisterForwarding::default());
    manager.register_pass(ConstantFolding::default());
    manager.register_pass(DeadCodeElimination::default());
    manager.register_pass(UnreachableBlockElimination::default());
    manager
}

pub fn optimize_module(module: &mut Module) {
    run_optimizer(module, DEFAULT_MAX_ROUNDS);
}

/// Runs the default passes until nothing changes, at most `max_rounds` times.
pub fn run_optimizer(module: &mut Module, max_rounds: usize) {
    let mut manager = default_pass_manager();
    match manager.run_to_fixed_point(module, max_rounds.max(1)) {
        Ok(rounds) => debug!("Optimizer settled after {} rounds", rounds),
        Err(e) => fatal(format!("Optimizer failed on {}: {}", module.name, e)),
    }
}
