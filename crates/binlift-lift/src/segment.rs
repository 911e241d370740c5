/*! Data segments become IR globals.
 *
 * A segment is cut at the boundaries of the variables recovery found in it. Each variable becomes
 * its own global holding exactly its bytes, so it can later be exported or renamed alone; the
 * bytes between variables become internal globals named after the segment. Pointer-sized
 * cross-references inside the data are turned into relocations once every global exists.
 */

use binlift_core::native::NativeSegment;
use binlift_core::{
    DataContents, GlobalVariable, Initializer, Module, NativeModule, RelocTarget, Relocation, Type,
};
use tracing::debug;

use crate::external::{import_at, imported_variable_at};
use crate::fatal;
use crate::function::get_native_to_lifted_entry_point;

const MAX_ALIGNMENT: u64 = 16;

pub fn add_data_segments(cfg: &NativeModule, module: &mut Module) {
    for segment in cfg.segments.values() {
        materialize_segment(cfg, segment, module);
    }
    for segment in cfg.segments.values() {
        add_relocations(cfg, segment, module);
    }
}

/// Internal name of the unnamed bytes of `segment` starting at `ea`.
pub fn gap_name(segment: &NativeSegment, ea: u64) -> String {
    let sanitized: String = segment
        .name
        .trim_start_matches('.')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("seg_{}_{:x}", sanitized, ea)
}

/// Largest power of two dividing `ea`, capped at 16.
fn natural_alignment(ea: u64) -> u64 {
    if ea == 0 {
        MAX_ALIGNMENT
    } else {
        (1u64 << ea.trailing_zeros()).min(MAX_ALIGNMENT)
    }
}

fn materialize_segment(cfg: &NativeModule, segment: &NativeSegment, module: &mut Module) {
    let mut pieces = Vec::new();
    let mut cursor = segment.ea;
    for var in cfg.variables_in(segment) {
        if var.ea > cursor {
            pieces.push((gap_name(segment, cursor), cursor, var.ea));
        }
        pieces.push((var.lifted_name.clone(), var.ea, var.end()));
        cursor = var.end();
    }
    if cursor < segment.end() {
        pieces.push((gap_name(segment, cursor), cursor, segment.end()));
    }

    for (name, start, end) in pieces {
        let contents = if segment.is_zero_range(start, end) {
            DataContents::Zeros(end - start)
        } else {
            DataContents::Bytes(segment.bytes_in(start, end))
        };
        let mut global = GlobalVariable::new(name.clone(), Type::bytes(end - start))
            .with_initializer(Initializer {
                contents,
                relocations: Vec::new(),
            })
            .with_native_address(start)
            .constant(segment.is_read_only);
        global.alignment = natural_alignment(start);

        if let Err(e) = module.add_global(global) {
            fatal(format!("Cannot materialize {} at {:#x}: {}", name, start, e));
        }
    }

    debug!(
        "Materialized segment {} [{:#x}, {:#x})",
        segment.name,
        segment.ea,
        segment.end()
    );
}

fn add_relocations(cfg: &NativeModule, segment: &NativeSegment, module: &mut Module) {
    let pointer_size = cfg.arch.pointer_size();
    for xref in &segment.xrefs {
        let Some((holder, offset)) = module.global_containing(xref.ea) else {
            fatal(format!(
                "Cross-reference at {:#x} in {} is not covered by any global",
                xref.ea, segment.name
            ));
        };
        if offset + pointer_size > module.global(holder).size() {
            fatal(format!(
                "Cross-reference at {:#x} straddles the end of {}",
                xref.ea,
                module.global(holder).name
            ));
        }

        let (target, addend) = if let Some(func) = cfg.ea_to_func.get(&xref.target) {
            let entry = get_native_to_lifted_entry_point(cfg, func, module);
            (RelocTarget::Function(entry), 0)
        } else if let Some(import) = import_at(cfg, module, xref.target) {
            (RelocTarget::Function(import), 0)
        } else if let Some(var) = imported_variable_at(cfg, module, xref.target) {
            (RelocTarget::Global(var), 0)
        } else if let Some((global, target_offset)) = module.global_containing(xref.target) {
            (RelocTarget::Global(global), target_offset as i64)
        } else {
            fatal(format!(
                "Cross-reference at {:#x} targets {:#x}, which is not a known symbol",
                xref.ea, xref.target
            ));
        };

        let Some(init) = module.global_mut(holder).initializer.as_mut() else {
            fatal(format!("Materialized global at {:#x} has no initializer", xref.ea));
        };
        if let DataContents::Bytes(bytes) = &mut init.contents {
            let start = offset as usize;
            bytes[start..start + pointer_size as usize].fill(0);
        }
        init.relocations.push(Relocation {
            offset,
            target,
            addend,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::declare_externals;
    use crate::function::declare_lifted_functions;
    use binlift_core::native::{NativeExternalFunction, NativeFunction, NativeVariable};
    use binlift_core::{Arch, FunctionKind, OperatingSystem};

    fn lift(cfg: &NativeModule) -> Module {
        let mut module = Module::new(&cfg.name, cfg.arch, cfg.os);
        declare_externals(cfg, &mut module);
        declare_lifted_functions(cfg, &mut module);
        add_data_segments(cfg, &mut module);
        module
    }

    #[test]
    fn test_segment_is_split_at_variables() {
        let mut data = vec![0u8; 0x20];
        data[0x10] = 0x2a;
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(NativeSegment::new(0x2000, ".data", data))
            .add_variable(NativeVariable::new(0x2010, "g_answer", 8));
        let module = lift(&cfg);

        let names: Vec<_> = module.symbol_names().collect();
        assert_eq!(names, vec!["seg_data_2000", "data_2010", "seg_data_2018"]);

        let answer = module.get_global_variable("data_2010").unwrap();
        let answer = module.global(answer);
        assert_eq!(answer.size(), 8);
        assert_eq!(answer.alignment, 16);
        assert_eq!(
            answer.initializer.as_ref().unwrap().contents,
            DataContents::Bytes(vec![0x2a, 0, 0, 0, 0, 0, 0, 0])
        );

        let head = module.get_global_variable("seg_data_2000").unwrap();
        assert_eq!(
            module.global(head).initializer.as_ref().unwrap().contents,
            DataContents::Zeros(0x10)
        );
        let tail = module.get_global_variable("seg_data_2018").unwrap();
        assert_eq!(module.global(tail).alignment, 8);
    }

    #[test]
    fn test_read_only_segment_is_constant() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(NativeSegment::new(0x3000, ".rodata", b"hi\0".to_vec()).read_only());
        let module = lift(&cfg);

        let id = module.get_global_variable("seg_rodata_3000").unwrap();
        assert!(module.global(id).is_constant);
    }

    #[test]
    fn test_xrefs_become_relocations() {
        let mut data = vec![0xffu8; 0x18];
        data[0x10..].fill(0);
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_function(NativeFunction::new(0x1000, "handler"))
            .add_external_function(NativeExternalFunction::new(0x9000, "puts", 1))
            .add_segment(
                NativeSegment::new(0x2000, ".data", data)
                    .with_xref(0x2000, 0x1000)
                    .with_xref(0x2008, 0x9000)
                    .with_xref(0x2010, 0x2004),
            );
        let module = lift(&cfg);

        let id = module.get_global_variable("seg_data_2000").unwrap();
        let init = module.global(id).initializer.as_ref().unwrap();
        assert_eq!(init.contents, DataContents::Bytes(vec![0; 0x18]));
        assert_eq!(init.relocations.len(), 3);

        let RelocTarget::Function(handler) = init.relocations[0].target else {
            panic!("expected a function relocation");
        };
        assert_eq!(module.function(handler).name, "callback_sub_1000");
        assert!(matches!(
            module.function(handler).kind,
            FunctionKind::NativeEntry { .. }
        ));

        assert_eq!(
            init.relocations[1].target,
            RelocTarget::Function(module.get_function("puts").unwrap())
        );
        assert_eq!(init.relocations[2].target, RelocTarget::Global(id));
        assert_eq!(init.relocations[2].addend, 4);
        module.verify().unwrap();
    }

    #[test]
    #[should_panic(expected = "not a known symbol")]
    fn test_unresolvable_xref_is_fatal() {
        let mut cfg = NativeModule::new("m", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(NativeSegment::zero_filled(0x2000, ".bss", 8).with_xref(0x2000, 0xdead));
        lift(&cfg);
    }

    #[test]
    fn test_gap_names_are_sanitized() {
        let segment = NativeSegment::zero_filled(0x4000, "__DATA.__const", 8);
        assert_eq!(gap_name(&segment, 0x4000), "seg___DATA___const_4000");
        assert_eq!(natural_alignment(0x4004), 4);
        assert_eq!(natural_alignment(0), 16);
    }
}
