use crate::function::FuncId;
use crate::linkage::{Linkage, StorageClass, Visibility};
use crate::types::Type;
use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(u32);
entity_impl!(GlobalId, "global");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub storage_class: StorageClass,
    pub is_constant: bool,
    pub alignment: u64,
    /// Native address of the first byte, for globals materialized from a segment.
    pub native_address: Option<u64>,
    /// `None` for declarations of imported data.
    pub initializer: Option<Initializer>,
}

impl GlobalVariable {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::Internal,
            visibility: Visibility::Default,
            storage_class: StorageClass::Default,
            is_constant: false,
            alignment: 1,
            native_address: None,
            initializer: None,
        }
    }

    pub fn with_initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_native_address(mut self, address: u64) -> Self {
        self.native_address = Some(address);
        self
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn constant(mut self, is_constant: bool) -> Self {
        self.is_constant = is_constant;
        self
    }

    pub fn is_declaration(&self) -> bool {
        self.initializer.is_none()
    }

    pub fn is_externally_visible(&self) -> bool {
        self.linkage.is_external() && self.visibility == Visibility::Default
    }

    pub fn size(&self) -> u64 {
        self.ty.size_bytes(8)
    }

    /// Whether `address` falls inside the native range this global covers.
    pub fn contains_address(&self, address: u64) -> bool {
        match self.native_address {
            Some(start) => address >= start && address < start + self.size().max(1),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initializer {
    pub contents: DataContents,
    pub relocations: Vec<Relocation>,
}

impl Initializer {
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self {
            contents: DataContents::Bytes(bytes),
            relocations: Vec::new(),
        }
    }

    pub fn zeros(size: u64) -> Self {
        Self {
            contents: DataContents::Zeros(size),
            relocations: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        match &self.contents {
            DataContents::Bytes(bytes) => bytes.len() as u64,
            DataContents::Zeros(size) => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataContents {
    Bytes(Vec<u8>),
    Zeros(u64),
}

/// A pointer-sized slot inside an initializer that holds the address of another symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub offset: u64,
    pub target: RelocTarget,
    pub addend: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocTarget {
    Function(FuncId),
    Global(GlobalId),
}
