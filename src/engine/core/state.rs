// File-backed state shared between runs (capability cache, benchmark history,
// synthetic probe input). Writers replace files atomically so a reader never
// observes a half-written file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::engine::error::{EngineError, EngineResult};

/// Sibling temp path in the same directory, so the final rename never
/// crosses a filesystem boundary
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Write-temp-then-rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_sibling(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json)?;
    Ok(())
}

/// Load a JSON document; a missing file is `Ok(None)`
pub fn load_json<T: DeserializeOwned>(path: &Path) -> EngineResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| EngineError::Persistence {
            path: path.to_path_buf(),
            source,
        })
}
