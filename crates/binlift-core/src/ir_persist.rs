use crate::module::Module;
use crate::native::{CfgError, NativeModule};
use crate::Result;
use std::fs;
use std::path::Path;

pub fn save_module(module: &Module, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(module)?;
    fs::write(path, json)?;
    Ok(())
}

/// Loads a module written by [`save_module`]. Symbol and address indexes are rebuilt.
pub fn load_module(path: impl AsRef<Path>) -> Result<Module> {
    let json = fs::read_to_string(path)?;
    let module = serde_json::from_str(&json)?;
    Ok(module)
}

pub fn load_native_module(path: impl AsRef<Path>) -> std::result::Result<NativeModule, CfgError> {
    crate::native::load_native_module(path)
}
