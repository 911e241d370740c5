/*! Downgrade to the legacy IR dialect.
 *
 * Older consumers do not understand register instructions and expect every access to the
 * register state spelled as a memory operation on the state structure.
 */

use binlift_core::{Instruction, InstructionData, IrDialect, MemSize, Module, Value};
use tracing::debug;

/// Rewrites register reads and writes into state-structure loads and stores.
///
/// Running it on a module that is already in the legacy dialect changes nothing.
pub fn downgrade_module(module: &mut Module) {
    if module.metadata.dialect == IrDialect::Legacy {
        return;
    }

    let arch = module.arch();
    let mut rewritten = 0usize;
    for (_, function) in module.functions_mut() {
        let Some(body) = function.body.as_mut() else {
            continue;
        };
        let block_ids: Vec<_> = body.blocks.keys().copied().collect();
        for block_id in block_ids {
            let old = std::mem::take(&mut body.blocks[&block_id].instructions);
            let mut new = Vec::with_capacity(old.len() + old.len() / 2);
            for data in old {
                let pc = data.pc;
                let annotation = data.annotation;
                let mut emit = |inst: Instruction| {
                    new.push(InstructionData {
                        inst,
                        pc,
                        annotation,
                    })
                };
                match data.inst {
                    Instruction::ReadRegister { result, reg } => {
                        let addr = body.new_temp();
                        emit(Instruction::StateAddress {
                            result: addr,
                            offset: arch.register_offset(reg),
                        });
                        emit(Instruction::Load {
                            result,
                            addr: Value::Temp(addr),
                            size: MemSize::Quad,
                        });
                        rewritten += 1;
                    }
                    Instruction::WriteRegister { reg, value } => {
                        let addr = body.new_temp();
                        emit(Instruction::StateAddress {
                            result: addr,
                            offset: arch.register_offset(reg),
                        });
                        emit(Instruction::Store {
                            addr: Value::Temp(addr),
                            value,
                            size: MemSize::Quad,
                        });
                        rewritten += 1;
                    }
                    inst => emit(inst),
                }
            }
            body.blocks[&block_id].instructions = new;
        }
    }

    module.metadata.dialect = IrDialect::Legacy;
    debug!("Downgraded {} register accesses", rewritten);
}
