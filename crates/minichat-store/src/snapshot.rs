//! Whole-document snapshot file.
//!
//! The state graph is written as one pretty-printed JSON document. Writes go
//! to `<file>.tmp` first and are renamed over the target, so a crash never
//! leaves a half-written document behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::migrations::{self, CURRENT_VERSION};
use crate::models::StateGraph;

/// A document read from disk.
#[derive(Debug)]
pub struct Loaded {
    pub state: StateGraph,
    /// Version the file had before migrations ran.
    pub from_version: u32,
}

impl Loaded {
    pub fn migrated(&self) -> bool {
        self.from_version != CURRENT_VERSION
    }
}

/// Read and migrate the document at `path`. `Ok(None)` if the file does
/// not exist.
pub fn load(path: &Path) -> Result<Option<Loaded>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut doc: serde_json::Value = serde_json::from_str(&raw)?;
    let from_version = migrations::run_migrations(&mut doc)?;
    let state: StateGraph = serde_json::from_value(doc)?;

    Ok(Some(Loaded {
        state,
        from_version,
    }))
}

/// Serialize `state` and atomically replace the file at `path`.
pub fn write(path: &Path, state: &StateGraph) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
