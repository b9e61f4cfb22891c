//! ENVI sidecar headers for headerless binary rasters.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use snow_cover_source_models::EnviHeader;
use tokio::io::AsyncWriteExt as _;

use crate::ConvertError;

/// The header location the translation tool looks for: `<raw>.hdr` with
/// the raw file's extension replaced.
#[must_use]
pub fn header_path(raw: &Path) -> PathBuf {
    raw.with_extension("hdr")
}

/// Writes `header` next to `raw` and returns its path.
///
/// An existing header is never overwritten.
///
/// # Errors
///
/// Returns [`ConvertError::HeaderCollision`] if the header already exists,
/// or [`ConvertError::Io`] if it cannot be written.
pub async fn write_envi_header(raw: &Path, header: &EnviHeader) -> Result<PathBuf, ConvertError> {
    let path = header_path(raw);

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            log::error!("Refusing to overwrite existing header {}", path.display());
            return Err(ConvertError::HeaderCollision {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(ConvertError::io(&path, e)),
    };

    file.write_all(header.to_string().as_bytes())
        .await
        .map_err(|e| ConvertError::io(&path, e))?;
    file.flush().await.map_err(|e| ConvertError::io(&path, e))?;

    log::debug!("Wrote {}", path.display());
    Ok(path)
}

/// Removes a header written by [`write_envi_header`] after the conversion
/// it was written for failed. Failure to remove is logged, not returned.
pub async fn remove_envi_header(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
    }
}
