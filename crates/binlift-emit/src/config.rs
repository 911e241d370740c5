use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub use_colors: bool,
    pub indent_style: IndentStyle,
    /// Print the native PC (and annotation, if any) next to each instruction.
    pub include_native_pcs: bool,
    /// Print initializer bytes of data globals.
    pub include_data: bool,
    pub verbosity: VerbosityLevel,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            use_colors: true,
            indent_style: IndentStyle::Spaces(4),
            include_native_pcs: false,
            include_data: true,
            verbosity: VerbosityLevel::Normal,
        }
    }
}

impl EmitterConfig {
    /// Plain output for files and tests.
    pub fn plain() -> Self {
        Self {
            use_colors: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndentStyle {
    Spaces(usize),
    Tabs,
}

impl IndentStyle {
    pub fn unit(&self) -> String {
        match self {
            IndentStyle::Spaces(n) => " ".repeat(*n),
            IndentStyle::Tabs => "\t".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Declarations only, no function bodies.
    Quiet,
    Normal,
    /// Adds native addresses of functions, blocks and globals.
    Verbose,
}

impl VerbosityLevel {
    pub fn should_print_bodies(&self) -> bool {
        !matches!(self, VerbosityLevel::Quiet)
    }

    pub fn should_print_addresses(&self) -> bool {
        matches!(self, VerbosityLevel::Verbose)
    }
}
