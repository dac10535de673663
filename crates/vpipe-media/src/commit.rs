//! Atomic publication of stage outputs.
//!
//! A stage writes its result to a temporary sibling of the canonical path and
//! then publishes it with a single rename. Readers of the canonical path see
//! either the previous complete file or the new complete file, never a
//! partially written one.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::CommitError;

/// Temporary path for a canonical output, in the same directory.
///
/// `merged.mp4` becomes `merged.tmp.mp4`, `thumb.png` becomes `thumb.tmp.png`.
/// Keeping the extension lets the external tool pick the right muxer.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{}.tmp.{}", stem, ext.to_string_lossy()),
        None => format!("{}.tmp", stem),
    };
    final_path.with_file_name(name)
}

/// Publish `temp` as `final_path` with a single rename.
///
/// Creates the parent directory of `final_path` if needed. A temporary file on
/// another filesystem is rejected rather than copied, since a copy could be
/// observed half-written.
///
/// # Errors
///
/// Returns an error if:
/// - `temp` does not exist
/// - the parent directory cannot be created
/// - the rename fails (cross-device, permissions, ...)
pub async fn commit(temp: impl AsRef<Path>, final_path: impl AsRef<Path>) -> Result<(), CommitError> {
    let temp = temp.as_ref();
    let final_path = final_path.as_ref();

    if !fs::try_exists(temp).await.unwrap_or(false) {
        return Err(CommitError::MissingTemp(temp.to_path_buf()));
    }

    ensure_parent(final_path).await?;

    match fs::rename(temp, final_path).await {
        Ok(()) => {
            tracing::debug!(
                "Committed {} -> {}",
                temp.display(),
                final_path.display()
            );
            Ok(())
        }
        Err(e) if is_cross_device_error(&e) => Err(CommitError::CrossDevice {
            temp: temp.to_path_buf(),
            target: final_path.to_path_buf(),
        }),
        Err(source) => Err(CommitError::Replace {
            temp: temp.to_path_buf(),
            target: final_path.to_path_buf(),
            source,
        }),
    }
}

/// Write `bytes` to a temporary sibling, flush it to disk, then commit it.
pub async fn commit_bytes(final_path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), CommitError> {
    let final_path = final_path.as_ref();
    ensure_parent(final_path).await?;

    let temp = temp_path_for(final_path);
    let write_err = |source| CommitError::Write {
        path: temp.clone(),
        source,
    };

    let mut file = fs::File::create(&temp).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    commit(&temp, final_path).await
}

async fn ensure_parent(path: &Path) -> Result<(), CommitError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| CommitError::CreateParent {
                    dir: parent.to_path_buf(),
                    source,
                })?;
        }
    }
    Ok(())
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}
