/*! Declarations for everything the recovered program imports.
 *
 * Imports are declared before anything else so that later stages can resolve calls, data
 * references and cross-references to them by name.
 */

use binlift_core::native::{NativeExternalFunction, NativeExternalVariable};
use binlift_core::{
    FuncId, Function, FunctionKind, GlobalId, GlobalVariable, Linkage, Module, NativeModule,
    OperatingSystem, Signature, StorageClass, SymbolRef, Type,
};
use tracing::debug;

use crate::fatal;

fn import_linkage(is_weak: bool) -> Linkage {
    if is_weak {
        Linkage::ExternalWeak
    } else {
        Linkage::External
    }
}

fn import_storage(os: OperatingSystem) -> StorageClass {
    match os {
        OperatingSystem::Windows => StorageClass::DllImport,
        _ => StorageClass::Default,
    }
}

pub fn declare_externals(cfg: &NativeModule, module: &mut Module) {
    for func in cfg.ea_to_extern_func.values() {
        declare_external_function(func, cfg.os, module);
    }
    for var in cfg.ea_to_extern_var.values() {
        declare_external_variable(var, cfg.os, module);
    }
}

/// Declares (or reuses) the import for `func`. Several stubs may import the same symbol.
pub fn declare_external_function(
    func: &NativeExternalFunction,
    os: OperatingSystem,
    module: &mut Module,
) -> FuncId {
    match module.lookup(&func.name) {
        Some(SymbolRef::Function(id)) if module.function(id).kind == FunctionKind::Import => {
            return id;
        }
        Some(_) => fatal(format!(
            "Import {} at {:#x} collides with an existing symbol",
            func.name, func.ea
        )),
        None => {}
    }

    let mut function = Function::new(
        func.name.clone(),
        Signature::native(func.num_args),
        FunctionKind::Import,
    )
    .with_linkage(import_linkage(func.is_weak))
    .with_native_address(func.ea);
    function.storage_class = import_storage(os);

    debug!("Declared import {} ({} args)", func.name, func.num_args);
    match module.declare_function(function) {
        Ok(id) => id,
        Err(e) => fatal(format!("Cannot declare import {}: {}", func.name, e)),
    }
}

pub fn declare_external_variable(
    var: &NativeExternalVariable,
    os: OperatingSystem,
    module: &mut Module,
) -> GlobalId {
    match module.lookup(&var.name) {
        Some(SymbolRef::Global(id)) if module.global(id).is_declaration() => return id,
        Some(_) => fatal(format!(
            "Imported variable {} at {:#x} collides with an existing symbol",
            var.name, var.ea
        )),
        None => {}
    }

    let mut global = GlobalVariable::new(var.name.clone(), Type::bytes(var.size.max(1)))
        .with_linkage(import_linkage(var.is_weak))
        .with_native_address(var.ea);
    global.storage_class = import_storage(os);

    debug!("Declared imported variable {} ({} bytes)", var.name, var.size);
    match module.add_global(global) {
        Ok(id) => id,
        Err(e) => fatal(format!("Cannot declare imported variable {}: {}", var.name, e)),
    }
}

/// The import declared for the external function at `ea`, if any.
pub fn import_at(cfg: &NativeModule, module: &Module, ea: u64) -> Option<FuncId> {
    let func = cfg.ea_to_extern_func.get(&ea)?;
    module.get_function(&func.name)
}

/// The declaration of the external variable at `ea`, if any.
pub fn imported_variable_at(cfg: &NativeModule, module: &Module, ea: u64) -> Option<GlobalId> {
    let var = cfg.ea_to_extern_var.get(&ea)?;
    module.get_global_variable(&var.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlift_core::Arch;

    fn cfg(os: OperatingSystem) -> NativeModule {
        let mut cfg = NativeModule::new("imports", Arch::X86_64, os);
        let mut weak = NativeExternalFunction::new(0x9010, "optional_hook", 0);
        weak.is_weak = true;
        cfg.add_external_function(NativeExternalFunction::new(0x9000, "puts", 1))
            .add_external_function(weak)
            .add_external_variable(NativeExternalVariable::new(0x9100, "environ", 8));
        cfg
    }

    #[test]
    fn test_imports_are_declarations_with_native_signatures() {
        let cfg = cfg(OperatingSystem::Linux);
        let mut module = Module::new("imports", Arch::X86_64, OperatingSystem::Linux);
        declare_externals(&cfg, &mut module);

        let puts = import_at(&cfg, &module, 0x9000).unwrap();
        let puts = module.function(puts);
        assert!(puts.is_declaration());
        assert_eq!(puts.kind, FunctionKind::Import);
        assert_eq!(puts.linkage, Linkage::External);
        assert_eq!(puts.signature, Signature::native(1));
        assert_eq!(puts.storage_class, StorageClass::Default);

        let hook = module.get_function("optional_hook").unwrap();
        assert_eq!(module.function(hook).linkage, Linkage::ExternalWeak);

        let environ = imported_variable_at(&cfg, &module, 0x9100).unwrap();
        assert!(module.global(environ).is_declaration());
        assert_eq!(module.global_containing(0x9100), None);
    }

    #[test]
    fn test_windows_imports_are_dllimport() {
        let cfg = cfg(OperatingSystem::Windows);
        let mut module = Module::new("imports", Arch::X86_64, OperatingSystem::Windows);
        declare_externals(&cfg, &mut module);

        let puts = module.get_function("puts").unwrap();
        assert_eq!(module.function(puts).storage_class, StorageClass::DllImport);
    }

    #[test]
    fn test_repeated_import_is_reused() {
        let mut module = Module::new("imports", Arch::X86_64, OperatingSystem::Linux);
        let first = declare_external_function(
            &NativeExternalFunction::new(0x9000, "puts", 1),
            OperatingSystem::Linux,
            &mut module,
        );
        let second = declare_external_function(
            &NativeExternalFunction::new(0x9040, "puts", 1),
            OperatingSystem::Linux,
            &mut module,
        );
        assert_eq!(first, second);
        assert_eq!(module.function_count(), 1);
    }

    #[test]
    #[should_panic(expected = "collides")]
    fn test_import_colliding_with_lifted_code_is_fatal() {
        let mut module = Module::new("imports", Arch::X86_64, OperatingSystem::Linux);
        module
            .declare_function(Function::new("puts", Signature::lifted(), FunctionKind::Lifted))
            .unwrap();
        declare_external_function(
            &NativeExternalFunction::new(0x9000, "puts", 1),
            OperatingSystem::Linux,
            &mut module,
        );
    }
}
