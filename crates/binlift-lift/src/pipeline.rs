/*! The module lifting pipeline.
 *
 * Stages run in a fixed order over one IR module. Each stage may rely on everything the stages
 * before it created: data initializers refer to function shells, bodies refer to data and
 * imports, and exports refer to lifted declarations. Only body definition can fail in a way the
 * caller is expected to handle; everything else is either validated up front or a bug.
 */

use binlift_core::{Module, NativeModule};
use tracing::info;

use crate::annotate::propagate_inst_annotations;
use crate::config::LiftConfig;
use crate::error::LiftError;
use crate::export::{export_functions, export_variables};
use crate::external::declare_externals;
use crate::function::{declare_lifted_functions, define_lifted_functions};
use crate::init_fini::call_init_fini_code;
use crate::legacy::downgrade_module;
use crate::optimize::run_optimizer;
use crate::segment::add_data_segments;

/// Lifts `cfg` into `module`.
///
/// The recovered program is validated and checked against the module's target before any stage
/// runs. On error the module may hold partial results and should be discarded.
pub fn lift_code_into_module(
    cfg: &NativeModule,
    module: &mut Module,
    config: &LiftConfig,
) -> Result<(), LiftError> {
    cfg.validate()?;
    if cfg.arch != module.arch() || cfg.os != module.os() {
        return Err(LiftError::TargetMismatch {
            module: format!("{}-{}", module.arch(), module.os()),
            program: format!("{}-{}", cfg.arch, cfg.os),
        });
    }
    module.metadata.source_digest = cfg.digest.clone();

    info!("Declaring {} imports", cfg.ea_to_extern_func.len() + cfg.ea_to_extern_var.len());
    declare_externals(cfg, module);

    info!("Declaring {} lifted functions", cfg.ea_to_func.len());
    declare_lifted_functions(cfg, module);

    info!("Adding {} data segments", cfg.segments.len());
    add_data_segments(cfg, module);

    info!("Defining lifted function bodies");
    define_lifted_functions(cfg, module)?;

    info!(
        "Exporting {} functions and {} variables",
        cfg.exported_funcs.len(),
        cfg.exported_vars.len()
    );
    export_functions(cfg, module);
    export_variables(cfg, module);

    info!("Synthesizing init and fini code");
    call_init_fini_code(cfg, module);

    if config.legacy_mode {
        info!("Downgrading to the legacy dialect");
        downgrade_module(module);
    }

    info!("Optimizing {}", module.name);
    run_optimizer(module, config.max_optimization_rounds);

    if let Some(tag) = config.annotation_channel() {
        info!("Propagating instruction annotations under {}", tag);
        propagate_inst_annotations(module, tag);
    }

    Ok(())
}

/// Creates a module for the target of `cfg` and lifts `cfg` into it.
pub fn lift(cfg: &NativeModule, config: &LiftConfig) -> Result<Module, LiftError> {
    let mut module = Module::new(cfg.name.clone(), cfg.arch, cfg.os);
    lift_code_into_module(cfg, &mut module, config)?;
    Ok(module)
}
