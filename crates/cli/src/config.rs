//! `rcl.toml` project configuration.
//!
//! ```toml
//! [compiler]
//! strict = true
//! tabs = "normalize"
//! tab_width = 2
//! ```
//!
//! Every key is optional. Command-line flags override file values.

use std::path::{Path, PathBuf};

use rcl_core::CompileOptions;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "rcl.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub compiler: CompileOptions,
}

pub fn read_config(path: &Path) -> Result<ProjectConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

/// Options for compiling `source`: the explicit `--config` file if given,
/// else an `rcl.toml` beside the source, else defaults.
pub fn resolve_options(explicit: Option<&Path>, source: &Path) -> Result<CompileOptions, String> {
    let path: Option<PathBuf> = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => source
            .parent()
            .map(|dir| dir.join(CONFIG_FILE))
            .filter(|p| p.is_file()),
    };
    match path {
        Some(p) => {
            tracing::debug!(config = %p.display(), "loading project config");
            Ok(read_config(&p)?.compiler)
        }
        None => Ok(CompileOptions::default()),
    }
}
