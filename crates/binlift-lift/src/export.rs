/*! Exposes selected lifted entities under their native names.
 *
 * Lifted code is internal and named by address. For every exported function the native-callable
 * entry point becomes the externally visible symbol; for every exported variable the lifted
 * global itself is renamed and made visible. Each stage resolves every address it needs before
 * touching the module, so a missing entity aborts without a partial export.
 */

use binlift_core::native::{NativeFunction, NativeVariable};
use binlift_core::{FuncId, GlobalId, Linkage, Module, NativeModule, StorageClass, Visibility};
use tracing::info;

use crate::fatal;
use crate::function::get_native_to_lifted_entry_point;

pub fn export_functions(cfg: &NativeModule, module: &mut Module) {
    let resolved: Vec<(&NativeFunction, FuncId)> = cfg
        .exported_funcs
        .iter()
        .map(|&ea| {
            let Some(func) = cfg.ea_to_func.get(&ea) else {
                fatal(format!("Exported function at {:#x} was not recovered", ea));
            };
            let Some(lifted) = module.get_function(&func.lifted_name) else {
                fatal(format!(
                    "Exported function {} at {:#x} has no lifted declaration {}",
                    func.display_name(),
                    ea,
                    func.lifted_name
                ));
            };
            (func, lifted)
        })
        .collect();

    for (func, lifted) in resolved {
        info!(
            "Exporting function {} ({}) at {:#x}",
            func.display_name(),
            module.function(lifted).name,
            func.ea
        );
        let entry = get_native_to_lifted_entry_point(cfg, func, module);
        let entry = module.function_mut(entry);
        entry.linkage = Linkage::External;
        entry.visibility = Visibility::Default;
    }
}

pub fn export_variables(cfg: &NativeModule, module: &mut Module) {
    let resolved: Vec<(&NativeVariable, GlobalId)> = cfg
        .exported_vars
        .iter()
        .map(|&ea| {
            let Some(var) = cfg.ea_to_var.get(&ea) else {
                fatal(format!("Exported variable at {:#x} was not recovered", ea));
            };
            let Some(global) = module.get_global_variable(&var.lifted_name) else {
                fatal(format!(
                    "Exported variable {} at {:#x} has no lifted global {}",
                    var.name, ea, var.lifted_name
                ));
            };
            (var, global)
        })
        .collect();

    for (var, global) in resolved {
        info!(
            "Exporting variable {} ({}) at {:#x}",
            var.name, var.lifted_name, var.ea
        );
        if let Err(e) = module.rename_global(global, var.name.clone()) {
            fatal(format!(
                "Cannot export {} at {:#x} under its native name: {}",
                var.lifted_name, var.ea, e
            ));
        }
        let global = module.global_mut(global);
        global.linkage = Linkage::External;
        global.visibility = Visibility::Default;
        global.storage_class = StorageClass::DllExport;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::declare_lifted_functions;
    use crate::segment::add_data_segments;
    use binlift_core::native::NativeSegment;
    use binlift_core::{Arch, OperatingSystem};

    fn cfg() -> NativeModule {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "compute"))
            .add_function(NativeFunction::new(0x1100, "helper"))
            .add_segment(NativeSegment::zero_filled(0x2000, ".bss", 0x10))
            .add_variable(NativeVariable::new(0x2000, "g_counter", 8))
            .add_variable(NativeVariable::new(0x2008, "g_private", 8))
            .export_function(0x1000)
            .export_variable(0x2000);
        cfg
    }

    fn prepared(cfg: &NativeModule) -> Module {
        let mut module = Module::new(&cfg.name, cfg.arch, cfg.os);
        declare_lifted_functions(cfg, &mut module);
        add_data_segments(cfg, &mut module);
        module
    }

    #[test]
    fn test_exported_function_gets_external_entry_point() {
        let cfg = cfg();
        let mut module = prepared(&cfg);
        export_functions(&cfg, &mut module);

        let entry = module.get_function("compute").unwrap();
        assert!(module.function(entry).is_externally_visible());
        let lifted = module.get_function("sub_1000").unwrap();
        assert_eq!(module.native_entry_point(lifted), Some(entry));
        assert_eq!(module.function(lifted).linkage, Linkage::Internal);

        assert!(module.get_function("helper").is_none());
    }

    #[test]
    fn test_exported_variable_is_renamed() {
        let cfg = cfg();
        let mut module = prepared(&cfg);
        export_variables(&cfg, &mut module);

        assert!(module.lookup("data_2000").is_none());
        let id = module.get_global_variable("g_counter").unwrap();
        let global = module.global(id);
        assert!(global.is_externally_visible());
        assert_eq!(global.storage_class, StorageClass::DllExport);

        let private = module.get_global_variable("data_2008").unwrap();
        assert_eq!(module.global(private).linkage, Linkage::Internal);
    }

    #[test]
    fn test_export_is_idempotent_for_functions() {
        let cfg = cfg();
        let mut module = prepared(&cfg);
        export_functions(&cfg, &mut module);
        let count = module.function_count();
        export_functions(&cfg, &mut module);
        assert_eq!(module.function_count(), count);
    }

    #[test]
    #[should_panic(expected = "was not recovered")]
    fn test_unknown_exported_variable_is_fatal() {
        let mut cfg = cfg();
        cfg.export_variable(0x2100);
        let mut module = prepared(&cfg);
        export_variables(&cfg, &mut module);
    }
}
