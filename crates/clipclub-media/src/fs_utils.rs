//! Filesystem helpers for publishing finished files atomically.
//!
//! Readers treat the presence of an output path as "finished", so files are
//! always produced under a temporary sibling name and renamed into place.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// A temporary path next to `path` that keeps its extension.
///
/// ffmpeg picks the muxer from the extension, so `out.mp4` becomes
/// `out.partial-<uuid>.mp4`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.partial-{}.{}", stem, uuid::Uuid::new_v4(), ext.to_string_lossy()),
        None => format!("{}.partial-{}", stem, uuid::Uuid::new_v4()),
    };
    path.with_file_name(name)
}

/// Move `src` onto `dst`, replacing it.
///
/// Falls back to copy-then-rename when the two are on different
/// filesystems (EXDEV).
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                src = %src.display(),
                dst = %dst.display(),
                "Cross-device rename, copying instead"
            );
            copy_atomic(src, dst).await?;
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!(src = %src.display(), error = %e, "Failed to remove moved file");
            }
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Copy `src` to `dst` so that `dst` only ever appears complete.
pub async fn copy_atomic(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !fs::try_exists(src).await.unwrap_or(false) {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }
    ensure_parent(dst).await?;

    let tmp = temp_sibling(dst);
    if let Err(e) = fs::copy(src, &tmp).await {
        remove_if_present(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, dst).await {
        remove_if_present(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

/// Best-effort removal of a leftover temporary file.
pub async fn remove_if_present(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
    }
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// EXDEV is error code 18 on Linux/macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}
