use super::{
    address, hex_bytes, CfgError, DataXref, NativeBlock, NativeExternalFunction,
    NativeExternalVariable, NativeFunction, NativeModule, NativeSegment, NativeVariable,
};
use crate::arch::{Arch, OperatingSystem};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleFile {
    name: String,
    arch: Arch,
    #[serde(default)]
    os: OperatingSystem,
    #[serde(default)]
    functions: Vec<FunctionEntry>,
    #[serde(default)]
    variables: Vec<VariableEntry>,
    #[serde(default)]
    segments: Vec<SegmentEntry>,
    #[serde(default)]
    external_functions: Vec<ExternalFunctionEntry>,
    #[serde(default)]
    external_variables: Vec<ExternalVariableEntry>,
    #[serde(default, with = "address::list")]
    init_funcs: Vec<u64>,
    #[serde(default, with = "address::list")]
    fini_funcs: Vec<u64>,
}

#[derive(Deserialize)]
struct FunctionEntry {
    #[serde(with = "address")]
    ea: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    exported: bool,
    #[serde(default)]
    blocks: Vec<NativeBlock>,
}

#[derive(Deserialize)]
struct VariableEntry {
    #[serde(with = "address")]
    ea: u64,
    name: String,
    size: u64,
    #[serde(default)]
    exported: bool,
}

#[derive(Deserialize)]
struct SegmentEntry {
    #[serde(with = "address")]
    ea: u64,
    name: String,
    #[serde(default, with = "hex_bytes")]
    data: Vec<u8>,
    /// Total size; bytes past `data` are zero. Defaults to the length of `data`.
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    xrefs: Vec<XrefEntry>,
}

#[derive(Deserialize)]
struct XrefEntry {
    #[serde(with = "address")]
    ea: u64,
    #[serde(with = "address")]
    target: u64,
}

#[derive(Deserialize)]
struct ExternalFunctionEntry {
    #[serde(with = "address")]
    ea: u64,
    name: String,
    #[serde(default)]
    num_args: usize,
    #[serde(default)]
    is_weak: bool,
}

#[derive(Deserialize)]
struct ExternalVariableEntry {
    #[serde(with = "address")]
    ea: u64,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    is_weak: bool,
}

fn insert_unique<T>(
    map: &mut std::collections::BTreeMap<u64, T>,
    ea: u64,
    value: T,
) -> Result<(), CfgError> {
    if map.insert(ea, value).is_some() {
        return Err(CfgError::DuplicateAddress { ea });
    }
    Ok(())
}

impl NativeModule {
    /// Parses a recovered-module description and records its SHA-256 digest.
    ///
    /// The result is not validated; call [`NativeModule::validate`] before lifting.
    pub fn from_json(text: &str) -> Result<Self, CfgError> {
        let file: ModuleFile = serde_json::from_str(text)?;
        let mut module = NativeModule::new(file.name, file.arch, file.os);

        for entry in file.functions {
            let mut function = NativeFunction::new(entry.ea, entry.name);
            for block in entry.blocks {
                if function.blocks.contains_key(&block.ea) {
                    return Err(CfgError::DuplicateAddress { ea: block.ea });
                }
                function = function.with_block(block);
            }
            if entry.exported {
                module.exported_funcs.insert(entry.ea);
            }
            insert_unique(&mut module.ea_to_func, entry.ea, function)?;
        }

        for entry in file.variables {
            if entry.exported {
                module.exported_vars.insert(entry.ea);
            }
            let var = NativeVariable::new(entry.ea, entry.name, entry.size);
            if var.checked_end().is_none() {
                return Err(CfgError::InvalidValue {
                    what: "variable size",
                    value: format!("{:#x} bytes at {:#x} overflow the address space", var.size, var.ea),
                });
            }
            insert_unique(&mut module.ea_to_var, entry.ea, var)?;
        }

        for entry in file.segments {
            let size = entry.size.unwrap_or(entry.data.len() as u64);
            if size < entry.data.len() as u64 {
                return Err(CfgError::InvalidValue {
                    what: "segment size",
                    value: format!("{} is smaller than its {} data bytes", size, entry.data.len()),
                });
            }
            if entry.ea.checked_add(size).is_none() {
                return Err(CfgError::InvalidValue {
                    what: "segment size",
                    value: format!("{:#x} bytes at {:#x} overflow the address space", size, entry.ea),
                });
            }
            let segment = NativeSegment {
                ea: entry.ea,
                name: entry.name,
                data: entry.data,
                size,
                is_read_only: entry.read_only,
                xrefs: entry
                    .xrefs
                    .into_iter()
                    .map(|x| DataXref {
                        ea: x.ea,
                        target: x.target,
                    })
                    .collect(),
            };
            insert_unique(&mut module.segments, entry.ea, segment)?;
        }

        for entry in file.external_functions {
            let mut function = NativeExternalFunction::new(entry.ea, entry.name, entry.num_args);
            function.is_weak = entry.is_weak;
            insert_unique(&mut module.ea_to_extern_func, entry.ea, function)?;
        }

        for entry in file.external_variables {
            let mut var = NativeExternalVariable::new(entry.ea, entry.name, entry.size);
            var.is_weak = entry.is_weak;
            insert_unique(&mut module.ea_to_extern_var, entry.ea, var)?;
        }

        module.init_funcs = file.init_funcs;
        module.fini_funcs = file.fini_funcs;

        let digest = Sha256::digest(text.as_bytes());
        module.digest = Some(digest.iter().map(|b| format!("{:02x}", b)).collect());

        debug!(
            "Loaded {}: {} functions, {} variables, {} segments",
            module.name,
            module.ea_to_func.len(),
            module.ea_to_var.len(),
            module.segments.len()
        );

        Ok(module)
    }
}

pub fn load_native_module<P: AsRef<Path>>(path: P) -> Result<NativeModule, CfgError> {
    let text = std::fs::read_to_string(path)?;
    NativeModule::from_json(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::Operation;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "name": "sample",
        "arch": "amd64",
        "functions": [
            {
                "ea": "0x1000",
                "name": "compute",
                "exported": true,
                "blocks": [
                    {
                        "ea": "0x1000",
                        "instructions": [
                            { "ea": "0x1000", "bytes": "48c7c02a000000", "op": "mov", "dst": "RAX", "src": 42 },
                            { "ea": "0x1007", "op": "return" }
                        ]
                    }
                ]
            },
            { "ea": 8192, "blocks": [] }
        ],
        "variables": [ { "ea": "0x3000", "name": "g_counter", "size": 8, "exported": true } ],
        "segments": [
            { "ea": "0x3000", "name": ".data", "data": "0100000000000000", "size": 16,
              "xrefs": [ { "ea": "0x3008", "target": "0x1000" } ] }
        ],
        "external_functions": [ { "ea": "0x5000", "name": "puts", "num_args": 1 } ],
        "init_funcs": [ "0x1000" ]
    }"#;

    #[test]
    fn test_from_json_builds_address_maps() {
        let cfg = NativeModule::from_json(SAMPLE).unwrap();

        assert_eq!(cfg.arch, Arch::X86_64);
        assert_eq!(cfg.os, OperatingSystem::Linux);
        assert_eq!(cfg.ea_to_func[&0x1000].lifted_name, "sub_1000");
        assert_eq!(cfg.ea_to_func[&0x2000].name, "");
        assert_eq!(cfg.ea_to_var[&0x3000].lifted_name, "data_3000");
        assert!(cfg.exported_funcs.contains(&0x1000));
        assert!(cfg.exported_vars.contains(&0x3000));
        assert_eq!(cfg.init_funcs, vec![0x1000]);

        let segment = &cfg.segments[&0x3000];
        assert_eq!(segment.size, 16);
        assert_eq!(segment.xrefs, vec![DataXref { ea: 0x3008, target: 0x1000 }]);

        let entry = cfg.ea_to_func[&0x1000].entry_block().unwrap();
        assert_eq!(entry.instructions[0].bytes.len(), 7);
        assert_eq!(entry.instructions[1].operation, Operation::Return);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_digest_depends_on_input() {
        let a = NativeModule::from_json(SAMPLE).unwrap();
        let b = NativeModule::from_json(&SAMPLE.replace("sample", "other")).unwrap();
        assert_eq!(a.digest.as_ref().map(String::len), Some(64));
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_duplicate_function_address_rejected() {
        let text = r#"{ "name": "d", "arch": "x86_64",
            "functions": [ { "ea": 16 }, { "ea": "0x10" } ] }"#;
        assert!(matches!(
            NativeModule::from_json(text),
            Err(CfgError::DuplicateAddress { ea: 0x10 })
        ));
    }

    #[test]
    fn test_malformed_address_rejected() {
        let text = r#"{ "name": "d", "arch": "x86_64", "functions": [ { "ea": "0xgg" } ] }"#;
        assert!(matches!(
            NativeModule::from_json(text),
            Err(CfgError::Malformed(_))
        ));
    }

    #[test]
    fn test_segment_past_end_of_address_space_rejected() {
        let text = r#"{ "name": "d", "arch": "x86_64",
            "segments": [ { "ea": "0xfffffffffffffff0", "name": ".top", "size": 32 } ] }"#;
        assert!(matches!(
            NativeModule::from_json(text),
            Err(CfgError::InvalidValue { what: "segment size", .. })
        ));
    }

    #[test]
    fn test_variable_past_end_of_address_space_rejected() {
        let text = r#"{ "name": "d", "arch": "x86_64",
            "variables": [ { "ea": "0xffffffffffffffff", "name": "g_last", "size": 8 } ] }"#;
        assert!(matches!(
            NativeModule::from_json(text),
            Err(CfgError::InvalidValue { what: "variable size", .. })
        ));
    }

    #[test]
    fn test_load_native_module_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = load_native_module(&path).unwrap();
        assert_eq!(cfg.name, "sample");
        assert!(matches!(
            load_native_module(dir.path().join("missing.json")),
            Err(CfgError::Io(_))
        ));
    }
}
