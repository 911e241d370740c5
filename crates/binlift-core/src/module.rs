use crate::arch::{Arch, OperatingSystem};
use crate::function::{FuncId, Function, FunctionKind};
use crate::global::{GlobalId, GlobalVariable};
use crate::{IrError, Result};
use cranelift_entity::PrimaryMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The IR module every lifting stage writes into.
///
/// Functions and globals live in arenas and are referred to by id, so instructions and
/// relocations stay valid when a symbol is renamed. The symbol table maps each current name
/// to exactly one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ModuleData")]
pub struct Module {
    pub name: String,
    pub metadata: ModuleMetadata,
    functions: PrimaryMap<FuncId, Function>,
    globals: PrimaryMap<GlobalId, GlobalVariable>,
    pub constructors: Vec<FuncId>,
    pub destructors: Vec<FuncId>,
    #[serde(skip)]
    symbols: IndexMap<String, SymbolRef>,
    #[serde(skip)]
    data_index: BTreeMap<u64, GlobalId>,
    #[serde(skip)]
    entry_points: BTreeMap<FuncId, FuncId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolRef {
    Function(FuncId),
    Global(GlobalId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub arch: Arch,
    pub os: OperatingSystem,
    pub dialect: IrDialect,
    /// SHA-256 of the recovered-module description this module was lifted from.
    pub source_digest: Option<String>,
    /// Name of the channel per-instruction annotations were propagated under.
    pub annotation_channel: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IrDialect {
    #[default]
    Current,
    /// Register accesses spelled as explicit state-structure memory operations.
    Legacy,
}

impl Module {
    pub fn new(name: impl Into<String>, arch: Arch, os: OperatingSystem) -> Self {
        Self {
            name: name.into(),
            metadata: ModuleMetadata {
                arch,
                os,
                dialect: IrDialect::Current,
                source_digest: None,
                annotation_channel: None,
            },
            functions: PrimaryMap::new(),
            globals: PrimaryMap::new(),
            constructors: Vec::new(),
            destructors: Vec::new(),
            symbols: IndexMap::new(),
            data_index: BTreeMap::new(),
            entry_points: BTreeMap::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.metadata.arch
    }

    pub fn os(&self) -> OperatingSystem {
        self.metadata.os
    }

    pub fn declare_function(&mut self, function: Function) -> Result<FuncId> {
        self.check_name_free(&function.name)?;
        let name = function.name.clone();
        let kind = function.kind;
        let id = self.functions.push(function);
        self.symbols.insert(name, SymbolRef::Function(id));
        if let FunctionKind::NativeEntry { target } = kind {
            self.entry_points.insert(target, id);
        }
        Ok(id)
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> Result<GlobalId> {
        self.check_name_free(&global.name)?;
        let name = global.name.clone();
        let indexed_address = global
            .native_address
            .filter(|_| !global.is_declaration());
        let id = self.globals.push(global);
        self.symbols.insert(name, SymbolRef::Global(id));
        if let Some(address) = indexed_address {
            self.data_index.insert(address, id);
        }
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolRef> {
        self.symbols.get(name).copied()
    }

    pub fn get_function(&self, name: &str) -> Option<FuncId> {
        match self.lookup(name)? {
            SymbolRef::Function(id) => Some(id),
            SymbolRef::Global(_) => None,
        }
    }

    pub fn get_global_variable(&self, name: &str) -> Option<GlobalId> {
        match self.lookup(name)? {
            SymbolRef::Global(id) => Some(id),
            SymbolRef::Function(_) => None,
        }
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut GlobalVariable {
        &mut self.globals[id]
    }

    pub fn contains_function(&self, id: FuncId) -> bool {
        self.functions.is_valid(id)
    }

    pub fn contains_global(&self, id: GlobalId) -> bool {
        self.globals.is_valid(id)
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions.iter()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = (FuncId, &mut Function)> {
        self.functions.iter_mut()
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVariable)> {
        self.globals.iter()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Current names in declaration order.
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    /// Renames a global. The old name stops resolving; no alias is kept.
    pub fn rename_global(&mut self, id: GlobalId, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        let old_name = self.globals[id].name.clone();
        if old_name == new_name {
            return Ok(());
        }
        self.check_name_free(&new_name)?;
        self.symbols.shift_remove(&old_name);
        self.symbols.insert(new_name.clone(), SymbolRef::Global(id));
        self.globals[id].name = new_name;
        Ok(())
    }

    /// The native-callable entry point forwarding into `lifted`, if one was synthesized.
    pub fn native_entry_point(&self, lifted: FuncId) -> Option<FuncId> {
        self.entry_points.get(&lifted).copied()
    }

    /// The materialized global covering `address`, with the offset of `address` inside it.
    pub fn global_containing(&self, address: u64) -> Option<(GlobalId, u64)> {
        let (&start, &id) = self.data_index.range(..=address).next_back()?;
        if self.globals[id].contains_address(address) {
            Some((id, address - start))
        } else {
            None
        }
    }

    fn check_name_free(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(IrError::InvalidModule("symbol with empty name".to_string()));
        }
        if self.symbols.contains_key(name) {
            return Err(IrError::DuplicateSymbol(name.to_string()));
        }
        Ok(())
    }

    fn rebuild_indexes(&mut self) {
        self.symbols.clear();
        self.data_index.clear();
        self.entry_points.clear();

        for (id, function) in self.functions.iter() {
            self.symbols
                .insert(function.name.clone(), SymbolRef::Function(id));
            if let FunctionKind::NativeEntry { target } = function.kind {
                self.entry_points.insert(target, id);
            }
        }
        for (id, global) in self.globals.iter() {
            self.symbols.insert(global.name.clone(), SymbolRef::Global(id));
            if let (Some(address), false) = (global.native_address, global.is_declaration()) {
                self.data_index.insert(address, id);
            }
        }
    }
}

#[derive(Deserialize)]
struct ModuleData {
    name: String,
    metadata: ModuleMetadata,
    functions: PrimaryMap<FuncId, Function>,
    globals: PrimaryMap<GlobalId, GlobalVariable>,
    constructors: Vec<FuncId>,
    destructors: Vec<FuncId>,
}

impl From<ModuleData> for Module {
    fn from(data: ModuleData) -> Self {
        let mut module = Module {
            name: data.name,
            metadata: data.metadata,
            functions: data.functions,
            globals: data.globals,
            constructors: data.constructors,
            destructors: data.destructors,
            symbols: IndexMap::new(),
            data_index: BTreeMap::new(),
            entry_points: BTreeMap::new(),
        };
        module.rebuild_indexes();
        module
    }
}
