/*! The recovered program: what CFG recovery hands to the lifter.
 *
 * Everything here is keyed by native address and read-only once lifting starts. The lifter
 * never decodes machine code; instructions arrive as semantic operations, and data arrives as
 * segments with pointer-sized cross-references already identified.
 */

mod data;
mod function;
mod load;

pub use data::{
    lifted_variable_name, DataXref, NativeExternalFunction, NativeExternalVariable,
    NativeSegment, NativeVariable,
};
pub use function::{
    lifted_function_name, MemOperand, NativeBlock, NativeFunction, NativeInstruction, Operand,
    Operation,
};
pub use load::load_native_module;

use crate::arch::{Arch, OperatingSystem};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CfgError {
    #[error("Malformed module description: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: String },
    #[error("Address {ea:#x} is defined more than once")]
    DuplicateAddress { ea: u64 },
    #[error("Address {ea:#x} is exported both as a function and as a variable")]
    AmbiguousExport { ea: u64 },
    #[error("Variable {name} at {ea:#x} lies outside every segment")]
    VariableOutsideSegment { name: String, ea: u64 },
    #[error("Variables at {first:#x} and {second:#x} overlap")]
    OverlappingVariables { first: u64, second: u64 },
    #[error("Segments at {first:#x} and {second:#x} overlap")]
    OverlappingSegments { first: u64, second: u64 },
    #[error("Cross-reference at {ea:#x} does not fit in segment {segment}")]
    XrefOutsideSegment { segment: String, ea: u64 },
    #[error("Exported name {name} at {ea:#x} is already taken by another symbol")]
    ConflictingExportName { name: String, ea: u64 },
}

/// A recovered binary, ready to lift.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeModule {
    pub name: String,
    pub arch: Arch,
    pub os: OperatingSystem,
    pub ea_to_func: BTreeMap<u64, NativeFunction>,
    pub ea_to_var: BTreeMap<u64, NativeVariable>,
    pub ea_to_extern_func: BTreeMap<u64, NativeExternalFunction>,
    pub ea_to_extern_var: BTreeMap<u64, NativeExternalVariable>,
    pub segments: BTreeMap<u64, NativeSegment>,
    pub exported_funcs: BTreeSet<u64>,
    pub exported_vars: BTreeSet<u64>,
    /// Constructors to run before `main`, in array order.
    pub init_funcs: Vec<u64>,
    /// Destructors to run after `main`, in array order.
    pub fini_funcs: Vec<u64>,
    /// SHA-256 of the serialized description, when loaded from one.
    pub digest: Option<String>,
}

impl NativeModule {
    pub fn new(name: impl Into<String>, arch: Arch, os: OperatingSystem) -> Self {
        Self {
            name: name.into(),
            arch,
            os,
            ea_to_func: BTreeMap::new(),
            ea_to_var: BTreeMap::new(),
            ea_to_extern_func: BTreeMap::new(),
            ea_to_extern_var: BTreeMap::new(),
            segments: BTreeMap::new(),
            exported_funcs: BTreeSet::new(),
            exported_vars: BTreeSet::new(),
            init_funcs: Vec::new(),
            fini_funcs: Vec::new(),
            digest: None,
        }
    }

    pub fn add_function(&mut self, function: NativeFunction) -> &mut Self {
        self.ea_to_func.insert(function.ea, function);
        self
    }

    pub fn add_variable(&mut self, variable: NativeVariable) -> &mut Self {
        self.ea_to_var.insert(variable.ea, variable);
        self
    }

    pub fn add_segment(&mut self, segment: NativeSegment) -> &mut Self {
        self.segments.insert(segment.ea, segment);
        self
    }

    pub fn add_external_function(&mut self, function: NativeExternalFunction) -> &mut Self {
        self.ea_to_extern_func.insert(function.ea, function);
        self
    }

    pub fn add_external_variable(&mut self, variable: NativeExternalVariable) -> &mut Self {
        self.ea_to_extern_var.insert(variable.ea, variable);
        self
    }

    pub fn export_function(&mut self, ea: u64) -> &mut Self {
        self.exported_funcs.insert(ea);
        self
    }

    pub fn export_variable(&mut self, ea: u64) -> &mut Self {
        self.exported_vars.insert(ea);
        self
    }

    pub fn segment_containing(&self, ea: u64) -> Option<&NativeSegment> {
        self.segments
            .range(..=ea)
            .next_back()
            .map(|(_, seg)| seg)
            .filter(|seg| seg.contains(ea))
    }

    /// Variables whose start lies inside `segment`, in address order.
    pub fn variables_in<'a>(
        &'a self,
        segment: &'a NativeSegment,
    ) -> impl Iterator<Item = &'a NativeVariable> + 'a {
        self.ea_to_var
            .range(segment.ea..segment.end())
            .map(|(_, var)| var)
    }

    /// Checks the invariants the lifting stages rely on but cannot check themselves.
    ///
    /// Membership of `exported_funcs` / `exported_vars` in the address maps is not
    /// checked here: the export stage asserts it.
    pub fn validate(&self) -> Result<(), CfgError> {
        if let Some(&ea) = self.exported_funcs.intersection(&self.exported_vars).next() {
            return Err(CfgError::AmbiguousExport { ea });
        }
        self.check_address_ranges()?;
        self.check_export_names()?;

        let pointer_size = self.arch.pointer_size();
        let mut previous: Option<&NativeSegment> = None;
        for segment in self.segments.values() {
            if let Some(prev) = previous {
                if prev.end() > segment.ea {
                    return Err(CfgError::OverlappingSegments {
                        first: prev.ea,
                        second: segment.ea,
                    });
                }
            }
            for xref in &segment.xrefs {
                let fits = xref.ea >= segment.ea
                    && xref
                        .ea
                        .checked_add(pointer_size)
                        .is_some_and(|end| end <= segment.end());
                if !fits {
                    return Err(CfgError::XrefOutsideSegment {
                        segment: segment.name.clone(),
                        ea: xref.ea,
                    });
                }
            }
            previous = Some(segment);
        }

        let mut previous: Option<&NativeVariable> = None;
        for var in self.ea_to_var.values() {
            let fits = self
                .segment_containing(var.ea)
                .map(|seg| var.end() <= seg.end())
                .unwrap_or(false);
            if !fits {
                return Err(CfgError::VariableOutsideSegment {
                    name: var.name.clone(),
                    ea: var.ea,
                });
            }
            if let Some(prev) = previous {
                if prev.end() > var.ea {
                    return Err(CfgError::OverlappingVariables {
                        first: prev.ea,
                        second: var.ea,
                    });
                }
            }
            previous = Some(var);
        }

        Ok(())
    }

    // Every `end()` below the range checks relies on this.
    fn check_address_ranges(&self) -> Result<(), CfgError> {
        for segment in self.segments.values() {
            if segment.checked_end().is_none() {
                return Err(CfgError::InvalidValue {
                    what: "segment size",
                    value: format!("{:#x} bytes at {:#x} overflow the address space", segment.size, segment.ea),
                });
            }
        }
        for var in self.ea_to_var.values() {
            if var.checked_end().is_none() {
                return Err(CfgError::InvalidValue {
                    what: "variable size",
                    value: format!("{:#x} bytes at {:#x} overflow the address space", var.size, var.ea),
                });
            }
        }
        Ok(())
    }

    /// Exported names become module symbols verbatim, so they must not collide with each
    /// other, with imports, or with the address-derived names of lifted entities.
    fn check_export_names(&self) -> Result<(), CfgError> {
        let mut taken: HashSet<&str> = self
            .ea_to_extern_func
            .values()
            .map(|f| f.name.as_str())
            .chain(self.ea_to_extern_var.values().map(|v| v.name.as_str()))
            .chain(self.ea_to_func.values().map(|f| f.lifted_name.as_str()))
            .chain(self.ea_to_var.values().map(|v| v.lifted_name.as_str()))
            .collect();

        let exported_funcs = self
            .exported_funcs
            .iter()
            .filter_map(|ea| self.ea_to_func.get(ea))
            .filter(|f| f.has_name())
            .map(|f| (f.ea, f.name.as_str()));
        let exported_vars = self
            .exported_vars
            .iter()
            .filter_map(|ea| self.ea_to_var.get(ea))
            .filter(|v| v.name != v.lifted_name)
            .map(|v| (v.ea, v.name.as_str()));

        for (ea, name) in exported_funcs.chain(exported_vars) {
            if name.is_empty() {
                return Err(CfgError::InvalidValue {
                    what: "exported variable name",
                    value: format!("empty name at {:#x}", ea),
                });
            }
            if !taken.insert(name) {
                return Err(CfgError::ConflictingExportName {
                    name: name.to_string(),
                    ea,
                });
            }
        }
        Ok(())
    }
}

/// Serde helpers for addresses written as JSON integers or `"0x..."` strings.
pub(crate) mod address {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAddress {
        Number(u64),
        Text(String),
    }

    pub(crate) fn parse(text: &str) -> Option<u64> {
        let text = text.trim();
        match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        }
    }

    fn from_raw<E: serde::de::Error>(raw: RawAddress) -> Result<u64, E> {
        match raw {
            RawAddress::Number(n) => Ok(n),
            RawAddress::Text(s) => {
                parse(&s).ok_or_else(|| E::custom(format!("invalid address `{}`", s)))
            }
        }
    }

    pub fn serialize<S: Serializer>(ea: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", ea))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        from_raw(RawAddress::deserialize(deserializer)?)
    }

    pub mod list {
        use super::RawAddress;
        use serde::ser::SerializeSeq;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(eas: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(eas.len()))?;
            for ea in eas {
                seq.serialize_element(&format!("{:#x}", ea))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<u64>, D::Error> {
            Vec::<RawAddress>::deserialize(deserializer)?
                .into_iter()
                .map(super::from_raw)
                .collect()
        }
    }
}

/// Serde helpers for byte strings written as hex.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn parse(text: &str) -> Option<Vec<u8>> {
        let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return None;
        }
        digits
            .chunks(2)
            .map(|pair| {
                let hi = pair[0].to_digit(16)?;
                let lo = pair[1].to_digit(16)?;
                Some((hi * 16 + lo) as u8)
            })
            .collect()
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex bytes `{}`", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_data() -> NativeModule {
        let mut cfg = NativeModule::new("test", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(NativeSegment::new(0x2000, ".data", vec![0; 16]));
        cfg.add_variable(NativeVariable::new(0x2000, "g_counter", 8));
        cfg
    }

    #[test]
    fn test_validate_accepts_consistent_module() {
        let cfg = module_with_data();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.segment_containing(0x200f).unwrap().name, ".data");
        assert!(cfg.segment_containing(0x2010).is_none());
    }

    #[test]
    fn test_validate_rejects_ambiguous_export() {
        let mut cfg = module_with_data();
        cfg.export_function(0x2000).export_variable(0x2000);
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::AmbiguousExport { ea: 0x2000 })
        ));
    }

    #[test]
    fn test_validate_rejects_stray_variable() {
        let mut cfg = module_with_data();
        cfg.add_variable(NativeVariable::new(0x200c, "spill", 8));
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::VariableOutsideSegment { ea: 0x200c, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_overlapping_variables() {
        let mut cfg = module_with_data();
        cfg.add_variable(NativeVariable::new(0x2004, "inner", 4));
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::OverlappingVariables { first: 0x2000, second: 0x2004 })
        ));
    }

    #[test]
    fn test_validate_does_not_check_export_membership() {
        let mut cfg = module_with_data();
        cfg.export_function(0x9999);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_segment_ending_past_address_space() {
        let mut cfg = NativeModule::new("top", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(
            NativeSegment::zero_filled(0xffff_ffff_ffff_fff0, ".top", 0x10)
                .with_xref(0xffff_ffff_ffff_fff8, 1),
        );
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::InvalidValue { what: "segment size", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_xref_wrapping_address_space() {
        let mut cfg = NativeModule::new("top", Arch::X86_64, OperatingSystem::Linux);
        cfg.add_segment(
            NativeSegment::zero_filled(0xffff_ffff_ffff_ff00, ".top", 0xfc)
                .with_xref(0xffff_ffff_ffff_fffa, 1),
        );
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::XrefOutsideSegment { ea: 0xffff_ffff_ffff_fffa, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_variable_ending_past_address_space() {
        let mut cfg = module_with_data();
        cfg.add_variable(NativeVariable::new(0xffff_ffff_ffff_fff8, "g_wrap", 0x10));
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::InvalidValue { what: "variable size", .. })
        ));
    }

    #[test]
    fn test_validate_accepts_same_named_local_functions() {
        let mut cfg = module_with_data();
        cfg.add_function(NativeFunction::new(0x1000, "cleanup"))
            .add_function(NativeFunction::new(0x1100, "cleanup"))
            .add_function(NativeFunction::new(0x1200, "cleanup"))
            .export_function(0x1200);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_colliding_export_names() {
        let mut cfg = module_with_data();
        cfg.add_function(NativeFunction::new(0x1000, "cleanup"))
            .add_function(NativeFunction::new(0x1100, "cleanup"))
            .export_function(0x1000)
            .export_function(0x1100);
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::ConflictingExportName { ref name, ea: 0x1100 }) if name == "cleanup"
        ));

        let mut cfg = module_with_data();
        cfg.add_function(NativeFunction::new(0x1000, "g_counter"))
            .export_function(0x1000)
            .export_variable(0x2000);
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::ConflictingExportName { ea: 0x2000, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_export_shadowing_other_symbols() {
        let mut cfg = module_with_data();
        cfg.add_external_function(NativeExternalFunction::new(0x9000, "g_counter", 1))
            .export_variable(0x2000);
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::ConflictingExportName { ea: 0x2000, .. })
        ));

        let mut cfg = module_with_data();
        cfg.add_function(NativeFunction::new(0x1000, "sub_1100"))
            .add_function(NativeFunction::new(0x1100, ""))
            .export_function(0x1000);
        assert!(matches!(
            cfg.validate(),
            Err(CfgError::ConflictingExportName { ea: 0x1000, .. })
        ));
    }

    #[test]
    fn test_address_and_hex_parsing() {
        assert_eq!(address::parse("0x1000"), Some(0x1000));
        assert_eq!(address::parse("4096"), Some(4096));
        assert_eq!(address::parse("0xzz"), None);
        assert_eq!(hex_bytes::parse("de ad"), Some(vec![0xde, 0xad]));
        assert_eq!(hex_bytes::parse("abc"), None);
    }
}
