use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbol linkage, mirroring what an object-file linker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    /// Visible only inside the module.
    Internal,
    /// Visible to the linker. Declarations with this linkage are imports.
    External,
    /// An import that may stay unresolved.
    ExternalWeak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
}

/// How a symbol is stored in formats with a separate import/export table (PE/COFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    #[default]
    Default,
    DllImport,
    DllExport,
}

impl Linkage {
    pub fn is_external(self) -> bool {
        !matches!(self, Linkage::Internal)
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::Internal => write!(f, "internal"),
            Linkage::External => write!(f, "external"),
            Linkage::ExternalWeak => write!(f, "extern_weak"),
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Default => write!(f, "default"),
            Visibility::Hidden => write!(f, "hidden"),
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageClass::Default => Ok(()),
            StorageClass::DllImport => write!(f, "dllimport"),
            StorageClass::DllExport => write!(f, "dllexport"),
        }
    }
}
