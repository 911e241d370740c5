use serde::{Deserialize, Serialize};

/// Options that change what the pipeline produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiftConfig {
    /// Rewrite register accesses into explicit state-structure memory operations after lifting.
    pub legacy_mode: bool,
    /// Channel name for per-instruction PC annotations. `None` or empty disables propagation.
    pub pc_annotation: Option<String>,
    /// Upper bound on optimizer rounds.
    pub max_optimization_rounds: usize,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            legacy_mode: false,
            pc_annotation: None,
            max_optimization_rounds: 8,
        }
    }
}

impl LiftConfig {
    /// The annotation channel, if propagation should run.
    pub fn annotation_channel(&self) -> Option<&str> {
        self.pc_annotation.as_deref().filter(|tag| !tag.is_empty())
    }
}
