//! JSON state files written atomically (tmp + rename).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DeployError, Result};

/// Read a JSON document, returning `None` when the file does not exist.
///
/// A file that exists but does not parse is reported as corrupt rather than
/// treated as absent.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(DeployError::io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| DeployError::CorruptState {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Serialize `value` and atomically replace `path` with it.
///
/// Readers observe either the previous document or the new one, never a
/// partially written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    // Serialize first so a failure leaves the old file untouched
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|err| DeployError::CorruptState {
        path: path.to_path_buf(),
        reason: format!("failed to serialize: {err}"),
    })?;
    bytes.push(b'\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| DeployError::io(parent, err))?;
    }

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, &bytes).map_err(|err| DeployError::io(&tmp_path, err))?;

    // rename() replaces atomically on unix; Windows needs the target gone first
    if cfg!(windows) && path.exists() {
        fs::remove_file(path).map_err(|err| DeployError::io(path, err))?;
    }
    fs::rename(&tmp_path, path).map_err(|err| DeployError::io(&tmp_path, err))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!("{}.{}.tmp", file_name, std::process::id()))
}
