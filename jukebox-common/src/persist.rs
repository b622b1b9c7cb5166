//! Atomic persistence for small JSON documents
//!
//! Every durable document (tag registry, link state, player settings) goes
//! through [`write_json_atomic`]: serialize, write a sibling `.tmp` file,
//! `fsync`, then rename over the target. A crash mid-save leaves either the
//! previous or the new document on disk, never a truncated one.
//!
//! Loading never fails hard: a missing document is the normal first-run
//! case, and a corrupt one is logged and replaced by the default value.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// How a document was obtained by [`load_json_or_default`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Parsed from disk
    Loaded,
    /// No file on disk; default used
    Missing,
    /// File present but unreadable or malformed; default used
    Corrupt(String),
}

/// Temp file used while replacing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write raw bytes to `path` atomically (temp file + fsync + rename)
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path_for(path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Load a JSON document, falling back to `T::default()` when missing or corrupt
///
/// `what` names the document in log messages ("tag registry", ...).
pub fn load_json_or_default<T>(path: &Path, what: &str) -> (T, LoadOutcome)
where
    T: DeserializeOwned + Default,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No {} at {}, starting empty", what, path.display());
            return (T::default(), LoadOutcome::Missing);
        }
        Err(e) => {
            error!("Failed to read {} at {}: {} (starting empty)", what, path.display(), e);
            return (T::default(), LoadOutcome::Corrupt(e.to_string()));
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => (value, LoadOutcome::Loaded),
        Err(e) => {
            error!(
                "Malformed {} at {}: {} (starting empty)",
                what,
                path.display(),
                e
            );
            (T::default(), LoadOutcome::Corrupt(e.to_string()))
        }
    }
}
