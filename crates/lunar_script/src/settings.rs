//! Session settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Open the engine's standard libraries on init.
    pub open_libs: bool,
    /// Switch the engine into JIT-compiling mode on init.
    pub jit: bool,
    /// Base directory for relative script paths.
    pub script_root: Option<PathBuf>,
}

impl SessionSettings {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Resolve a script path against `script_root`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.script_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            open_libs: true,
            jit: cfg!(feature = "luajit"),
            script_root: None,
        }
    }
}
