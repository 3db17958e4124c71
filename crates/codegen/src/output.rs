//! Writing generated artifacts to disk.

use crate::bundle::{CodegenBundle, CodegenError};
use crate::module::{emit, ModuleFormat};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// The interchange document itself.
    Json,
    Js,
    Ts,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Json, OutputFormat::Js, OutputFormat::Ts];

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Js => "js",
            OutputFormat::Ts => "ts",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub out_dir: PathBuf,
    /// File name without extension; the agent id when `None`.
    pub stem: Option<String>,
    pub formats: Vec<OutputFormat>,
}

/// Write `<stem>.<ext>` for each requested format into `out_dir`, creating
/// it if needed. Returns the written paths in request order.
pub fn write_outputs(bundle: &Value, config: &OutputConfig) -> Result<Vec<PathBuf>, CodegenError> {
    let parsed = CodegenBundle::from_interchange(bundle)?;
    let stem = config.stem.clone().unwrap_or_else(|| parsed.id.clone());

    std::fs::create_dir_all(&config.out_dir).map_err(|source| CodegenError::Io {
        path: config.out_dir.clone(),
        source,
    })?;

    let mut written = Vec::new();
    for &format in &config.formats {
        let path = config.out_dir.join(format!("{}.{}", stem, format.extension()));
        if written.contains(&path) {
            continue;
        }
        let contents = match format {
            OutputFormat::Json => serde_json::to_string_pretty(bundle)? + "\n",
            OutputFormat::Js => emit(&parsed, ModuleFormat::Esm)?,
            OutputFormat::Ts => emit(&parsed, ModuleFormat::TypeScript)?,
        };
        write(&path, &contents)?;
        debug!(path = %path.display(), bytes = contents.len(), "wrote output");
        written.push(path);
    }
    Ok(written)
}

fn write(path: &Path, contents: &str) -> Result<(), CodegenError> {
    std::fs::write(path, contents).map_err(|source| CodegenError::Io {
        path: path.to_path_buf(),
        source,
    })
}
