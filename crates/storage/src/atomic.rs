//! Atomic JSON file writes.
//!
//! The temp file is created in the target's own directory so the final
//! rename stays on one filesystem and is atomic. A crash mid-write leaves
//! the previous file intact; readers see either the old or the new content,
//! never a partial one.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use va_domain::error::{Error, Result};

/// Atomically write `value` as pretty JSON to `path`.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_impl(path, value, None)
}

/// Atomically write `value` as pretty JSON to `path` with explicit Unix
/// permissions (e.g. `0o640` for audit logs). No-op mode on non-Unix.
pub fn atomic_write_json_with_mode<T: Serialize>(
    path: &Path,
    value: &T,
    mode: u32,
) -> Result<()> {
    write_impl(path, value, Some(mode))
}

fn write_impl<T: Serialize>(path: &Path, value: &T, mode: Option<u32>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("no parent directory for {}", path.display())))?;

    let tmp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&tmp, value)?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Read and deserialize a JSON file. Returns `Ok(None)` when the file does
/// not exist; any other I/O or parse failure is surfaced to the caller.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}
