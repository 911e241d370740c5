/*! Structural checks on a finished module.
 *
 * The lifting stages assume each other's output is well formed; the verifier is where that is
 * actually checked, before codegen or after loading a module from disk.
 */

use crate::function::{Function, FunctionBody};
use crate::global::RelocTarget;
use crate::instructions::Instruction;
use crate::module::{Module, SymbolRef};
use crate::values::{TempId, Value};
use crate::{IrError, Result};
use std::collections::HashSet;

impl Module {
    pub fn verify(&self) -> Result<()> {
        self.verify_symbols()?;

        for (_, function) in self.functions() {
            if let Some(body) = &function.body {
                self.verify_body(function, body)?;
            }
        }

        for (_, global) in self.globals() {
            let Some(init) = &global.initializer else {
                continue;
            };
            for reloc in &init.relocations {
                let valid = match reloc.target {
                    RelocTarget::Function(id) => self.contains_function(id),
                    RelocTarget::Global(id) => self.contains_global(id),
                };
                if !valid {
                    return Err(IrError::Verification {
                        function: global.name.clone(),
                        message: format!("relocation at offset {} has a dangling target", reloc.offset),
                    });
                }
                if reloc.offset + 8 > init.len() {
                    return Err(IrError::Verification {
                        function: global.name.clone(),
                        message: format!("relocation at offset {} overruns the initializer", reloc.offset),
                    });
                }
            }
        }

        for &id in self.constructors.iter().chain(&self.destructors) {
            if !self.contains_function(id) {
                return Err(IrError::InvalidModule(format!(
                    "constructor or destructor {} does not exist",
                    id
                )));
            }
        }

        Ok(())
    }

    fn verify_symbols(&self) -> Result<()> {
        let mut seen = 0;
        for name in self.symbol_names() {
            seen += 1;
            let entity_name = match self.lookup(name) {
                Some(SymbolRef::Function(id)) => self.function(id).name.as_str(),
                Some(SymbolRef::Global(id)) => self.global(id).name.as_str(),
                None => return Err(IrError::UnknownSymbol(name.to_string())),
            };
            if entity_name != name {
                return Err(IrError::InvalidModule(format!(
                    "symbol {} resolves to an entity named {}",
                    name, entity_name
                )));
            }
        }
        if seen != self.function_count() + self.global_count() {
            return Err(IrError::InvalidModule(
                "symbol table does not cover every function and global".to_string(),
            ));
        }
        Ok(())
    }

    fn verify_body(&self, function: &Function, body: &FunctionBody) -> Result<()> {
        let fail = |message: String| IrError::Verification {
            function: function.name.clone(),
            message,
        };

        if body.get_block(body.entry_block).is_none() {
            return Err(fail(format!("entry block {} is missing", body.entry_block)));
        }

        let param_count = function.signature.params.len() as u32;

        for (block_id, block) in &body.blocks {
            if !block.is_terminated() {
                return Err(fail(format!("{} has no terminator", block_id)));
            }
            for succ in block.successors() {
                if body.get_block(succ).is_none() {
                    return Err(fail(format!("{} branches to missing {}", block_id, succ)));
                }
            }

            let mut defined: HashSet<TempId> = HashSet::new();
            let check_use = |value: Value, defined: &HashSet<TempId>| match value {
                Value::Temp(t) if !defined.contains(&t) => {
                    Err(fail(format!("{} uses {} before it is defined", block_id, t)))
                }
                Value::Param(p) if p.0 >= param_count => {
                    Err(fail(format!("{} uses {} beyond the signature", block_id, p)))
                }
                _ => Ok(()),
            };

            for data in &block.instructions {
                for operand in data.inst.operands() {
                    check_use(operand, &defined)?;
                }
                if let Some(func) = data.inst.referenced_function() {
                    if !self.contains_function(func) {
                        return Err(fail(format!("{} references missing {}", block_id, func)));
                    }
                }
                if let Some(global) = data.inst.referenced_global() {
                    if !self.contains_global(global) {
                        return Err(fail(format!("{} references missing {}", block_id, global)));
                    }
                }
                if matches!(data.inst, Instruction::CallLifted { .. })
                    && function.signature.params.is_empty()
                    && !function.owns_state()
                {
                    return Err(fail(format!("{} calls lifted code without a state", block_id)));
                }
                if let Some(result) = data.inst.result() {
                    if !defined.insert(result) {
                        return Err(fail(format!("{} redefines {}", block_id, result)));
                    }
                }
            }

            for operand in block.terminator.operands() {
                check_use(operand, &defined)?;
            }
        }

        Ok(())
    }
}
