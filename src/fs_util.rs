use std::fs;
use std::path::PathBuf;

use camino::Utf8Path;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DenoiseError;

/// Writes pretty JSON through a temp file so readers never see a partial document.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), DenoiseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DenoiseError::Filesystem(err.to_string()))?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| DenoiseError::Filesystem(err.to_string()))?;
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| DenoiseError::Filesystem(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| DenoiseError::Filesystem(format!("rename to {path}: {err}")))?;
    Ok(())
}

/// Reads a JSON document, returning `None` when the file does not exist.
pub fn read_json_optional<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, DenoiseError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| DenoiseError::Filesystem(format!("read {path}: {err}")))?;
    let value = serde_json::from_str(&content)
        .map_err(|err| DenoiseError::Filesystem(format!("parse {path}: {err}")))?;
    Ok(Some(value))
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
