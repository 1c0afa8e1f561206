//! Local file-based persistence for projection checkpoints.
//!
//! Checkpoints are stored as JSON files at
//! `<base_dir>/<scope_name>/checkpoint.json`. Writes are atomic via a
//! temp-rename pattern to prevent corruption from crashes mid-write.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::projection::Checkpoint;

/// Compute the filesystem path for a checkpoint file.
///
/// # Arguments
///
/// * `base_dir` - Root directory for checkpoints.
/// * `scope_name` - The projection scope (see
///   [`ProjectionFold::scope_name`](crate::ProjectionFold::scope_name)).
///
/// # Returns
///
/// `<base_dir>/<scope_name>/checkpoint.json`
pub fn checkpoint_path(base_dir: &Path, scope_name: &str) -> PathBuf {
    base_dir.join(scope_name).join("checkpoint.json")
}

/// Save a checkpoint atomically to disk.
///
/// Writes to `checkpoint.json.tmp` in the same directory, then renames it
/// to `checkpoint.json`. Creates the scope directory if needed.
///
/// # Errors
///
/// Returns `io::Error` if directory creation, serialization, writing, or
/// renaming fails.
pub fn save_checkpoint<S: Serialize>(
    base_dir: &Path,
    scope_name: &str,
    checkpoint: &Checkpoint<S>,
) -> io::Result<()> {
    let path = checkpoint_path(base_dir, scope_name);
    let dir = base_dir.join(scope_name);
    std::fs::create_dir_all(&dir)?;

    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(checkpoint)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Load a checkpoint from disk.
///
/// # Returns
///
/// - `Ok(Some(checkpoint))` if the file exists and deserializes.
/// - `Ok(None)` if the file does not exist or is corrupt. A corrupt file
///   is logged and treated as a miss, so the projection resyncs from
///   genesis.
///
/// # Errors
///
/// Returns `io::Error` only for unexpected I/O failures (e.g. permission denied).
pub fn load_checkpoint<S: DeserializeOwned>(
    base_dir: &Path,
    scope_name: &str,
) -> io::Result<Option<Checkpoint<S>>> {
    let path = checkpoint_path(base_dir, scope_name);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    match serde_json::from_slice::<Checkpoint<S>>(&bytes) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "corrupt checkpoint, will resync from genesis"
            );
            Ok(None)
        }
    }
}
