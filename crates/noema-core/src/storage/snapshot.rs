//! Content-hashed point-in-time images of the store.
//!
//! Each snapshot is a bincode [`StoreState`] written to
//! `<dir>/<unix-millis>-<hash12>.snap`, with a `sha256sum`-style sidecar
//! `<name>.sha256` holding the full digest. Files are written to a temporary
//! name first and renamed into place.

use crate::error::{NoemaError, Result};
use crate::storage::records::StoreState;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const SNAPSHOT_EXT: &str = "snap";
const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    created_at: DateTime<Utc>,
    state: StoreState,
}

/// Reference to a snapshot on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupHandle {
    /// File stem, `<unix-millis>-<hash12>`.
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the snapshot file.
    pub content_hash: String,
}

impl BackupHandle {
    /// Rebuild a handle from a snapshot path and its sidecar.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| NoemaError::Validation(format!("Not a snapshot path: {:?}", path)))?
            .to_string();
        let millis = stem
            .split('-')
            .next()
            .and_then(|m| m.parse::<i64>().ok())
            .ok_or_else(|| NoemaError::Validation(format!("Not a snapshot name: {}", stem)))?;
        let created_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| NoemaError::Validation(format!("Bad snapshot timestamp: {}", stem)))?;
        let content_hash = read_sidecar(&path)?.ok_or_else(|| {
            NoemaError::StorageCorruption(format!("Missing checksum sidecar for {:?}", path))
        })?;
        Ok(Self {
            id: stem,
            path,
            created_at,
            content_hash,
        })
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension(format!("{}.sha256", SNAPSHOT_EXT))
}

fn read_sidecar(path: &Path) -> Result<Option<String>> {
    let sidecar = sidecar_path(path);
    if !sidecar.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&sidecar)?;
    Ok(text.split_whitespace().next().map(|s| s.to_string()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialise `state` into `dir` and return its handle.
pub fn write_snapshot(dir: &Path, state: &StoreState) -> Result<BackupHandle> {
    std::fs::create_dir_all(dir)?;

    // Millisecond precision, matching what the file name can carry.
    let now = Utc::now();
    let created_at = Utc
        .timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now);
    let file = SnapshotFile {
        format: SNAPSHOT_FORMAT,
        created_at,
        state: state.clone(),
    };
    let bytes = bincode::serialize(&file)?;
    let hash = sha256_hex(&bytes);

    let id = format!("{}-{}", created_at.timestamp_millis(), &hash[..12]);
    let path = dir.join(format!("{}.{}", id, SNAPSHOT_EXT));
    let tmp = dir.join(format!(".{}.tmp", id));

    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, &path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    std::fs::write(sidecar_path(&path), format!("{}  {}\n", hash, file_name))?;

    Ok(BackupHandle {
        id,
        path,
        created_at,
        content_hash: hash,
    })
}

/// Load and verify a snapshot. Any mismatch between the file, its sidecar and
/// the handle is reported as [`NoemaError::StorageCorruption`].
pub fn read_snapshot(handle: &BackupHandle) -> Result<StoreState> {
    let bytes = std::fs::read(&handle.path).map_err(|e| {
        NoemaError::StorageCorruption(format!("Cannot read snapshot {:?}: {}", handle.path, e))
    })?;
    let actual = sha256_hex(&bytes);

    if actual != handle.content_hash {
        return Err(NoemaError::StorageCorruption(format!(
            "Checksum mismatch for {}: expected {}, actual {}",
            handle.id, handle.content_hash, actual
        )));
    }
    if let Some(sidecar) = read_sidecar(&handle.path)? {
        if sidecar != actual {
            return Err(NoemaError::StorageCorruption(format!(
                "Checksum sidecar mismatch for {}: sidecar {}, actual {}",
                handle.id, sidecar, actual
            )));
        }
    }

    let file: SnapshotFile = bincode::deserialize(&bytes).map_err(|e| {
        NoemaError::StorageCorruption(format!("Undecodable snapshot {}: {}", handle.id, e))
    })?;
    if file.format != SNAPSHOT_FORMAT {
        return Err(NoemaError::StorageCorruption(format!(
            "Snapshot {} has unknown format v{}",
            handle.id, file.format
        )));
    }
    Ok(file.state)
}

/// Snapshots in `dir`, newest first. Files without a readable sidecar are skipped.
pub fn list_snapshots(dir: &Path) -> Result<Vec<BackupHandle>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut handles = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
            continue;
        }
        match BackupHandle::from_path(&path) {
            Ok(handle) => handles.push(handle),
            Err(e) => log::warn!("Skipping snapshot {:?}: {}", path, e),
        }
    }
    handles.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    Ok(handles)
}

/// Delete all but the newest `keep` snapshots. Returns how many were removed.
pub fn prune_snapshots(dir: &Path, keep: usize) -> Result<usize> {
    let handles = list_snapshots(dir)?;
    let mut removed = 0;
    for handle in handles.into_iter().skip(keep) {
        std::fs::remove_file(&handle.path)?;
        let sidecar = sidecar_path(&handle.path);
        if sidecar.exists() {
            std::fs::remove_file(sidecar)?;
        }
        removed += 1;
    }
    Ok(removed)
}
