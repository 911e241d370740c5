/*! Runs the program's own initializers and finalizers.
 *
 * The recovered init and fini arrays name lifted functions that the native loader used to call.
 * One synthesized driver per array calls them in order on a fresh register state; the drivers are
 * registered as module constructors and destructors so codegen can place them where the target
 * loader looks.
 */

use binlift_core::arch::DEFAULT_STACK_SIZE;
use binlift_core::{
    FuncId, Function, FunctionBody, FunctionBuilder, FunctionKind, Module, NativeModule, Signature,
};
use tracing::debug;

use crate::fatal;

pub const INIT_DRIVER: &str = "__binlift_init";
pub const FINI_DRIVER: &str = "__binlift_fini";

pub fn call_init_fini_code(cfg: &NativeModule, module: &mut Module) {
    if let Some(driver) = synthesize_driver(cfg, module, INIT_DRIVER, &cfg.init_funcs) {
        module.constructors.push(driver);
    }
    if let Some(driver) = synthesize_driver(cfg, module, FINI_DRIVER, &cfg.fini_funcs) {
        module.destructors.push(driver);
    }
}

fn synthesize_driver(
    cfg: &NativeModule,
    module: &mut Module,
    name: &str,
    targets: &[u64],
) -> Option<FuncId> {
    if targets.is_empty() {
        return None;
    }

    let callees: Vec<FuncId> = targets
        .iter()
        .map(|&ea| {
            let Some(func) = cfg.ea_to_func.get(&ea) else {
                fatal(format!("{} entry {:#x} is not a recovered function", name, ea));
            };
            match module.get_function(&func.lifted_name) {
                Some(id) => id,
                None => fatal(format!(
                    "{} entry {} at {:#x} has no lifted declaration",
                    name, func.lifted_name, ea
                )),
            }
        })
        .collect();

    let arch = module.arch();
    let mut body = FunctionBody::new();
    let mut builder = FunctionBuilder::new(&mut body);
    let stack_top = builder.alloc_stack(DEFAULT_STACK_SIZE);
    builder.write_register(arch.stack_pointer(), stack_top);
    for &callee in &callees {
        builder.call_lifted(callee);
    }
    builder.ret(None);

    let mut driver = Function::new(name, Signature::new(Vec::new(), Vec::new()), FunctionKind::InitFini);
    driver.body = Some(body);

    match module.declare_function(driver) {
        Ok(id) => {
            debug!("Synthesized {} calling {} functions", name, callees.len());
            Some(id)
        }
        Err(e) => fatal(format!("Cannot declare {}: {}", name, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::declare_lifted_functions;
    use binlift_core::native::NativeFunction;
    use binlift_core::{Arch, Instruction, OperatingSystem};

    #[test]
    fn test_init_driver_calls_functions_in_array_order() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "a"))
            .add_function(NativeFunction::new(0x2000, "b"));
        cfg.init_funcs = vec![0x2000, 0x1000];

        let mut module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        declare_lifted_functions(&cfg, &mut module);
        call_init_fini_code(&cfg, &mut module);

        let init = module.get_function(INIT_DRIVER).unwrap();
        assert_eq!(module.constructors, vec![init]);
        assert!(module.destructors.is_empty());
        assert!(module.get_function(FINI_DRIVER).is_none());

        let body = module.function(init).body.as_ref().unwrap();
        let callees: Vec<_> = body.blocks[&body.entry_block]
            .instructions
            .iter()
            .filter_map(|d| match d.inst {
                Instruction::CallLifted { callee } => Some(module.function(callee).name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(callees, vec!["sub_2000", "sub_1000"]);
    }

    #[test]
    fn test_empty_arrays_synthesize_nothing() {
        let cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        let mut module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        call_init_fini_code(&cfg, &mut module);
        assert_eq!(module.function_count(), 0);
    }
}
