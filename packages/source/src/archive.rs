//! Tar + gzip utilities for unpacking downloaded archives.
//!
//! The daily SNODAS archive bundles several products, each member
//! individually gzipped. [`extract_selected`] keeps only the members an
//! [`ExtractionFilter`] matches and deletes the archive afterwards;
//! [`expand_nested`] then replaces every `.gz` member with its payload.
//! Both are blocking and meant to run on a blocking thread.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use snow_cover_source_models::ExtractionFilter;

/// Member names logged after an extraction.
const LOGGED_MEMBERS: usize = 5;

/// Extracts the members of a `.tar` archive whose name matches `filter`
/// into `dest_dir`, then deletes the archive.
///
/// Members are written by file name only; directory components inside the
/// archive are dropped, which also keeps every write inside `dest_dir`.
/// Extracting zero members is not an error.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the archive is missing or unreadable, or a
/// member cannot be written.
pub fn extract_selected(
    archive_path: &Path,
    filter: &ExtractionFilter,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    if !archive_path.exists() {
        return Err(ArchiveError::ArchiveNotFound(
            archive_path.display().to_string(),
        ));
    }

    std::fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::io(dest_dir, e))?;

    let file = File::open(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let mut archive = tar::Archive::new(file);
    let mut extracted = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| ArchiveError::io(archive_path, e))?
    {
        let mut entry = entry.map_err(|e| ArchiveError::io(archive_path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let member = entry
            .path()
            .map_err(|e| ArchiveError::io(archive_path, e))?
            .into_owned();
        if !filter.matches(&member.to_string_lossy()) {
            continue;
        }
        let Some(name) = member.file_name() else {
            continue;
        };

        let out = dest_dir.join(name);
        entry.unpack(&out).map_err(|e| ArchiveError::io(&out, e))?;
        extracted.push(out);
    }
    drop(archive);

    log::info!(
        "Extracted {} member(s) matching {:?}: {:?}",
        extracted.len(),
        filter.keywords(),
        extracted
            .iter()
            .take(LOGGED_MEMBERS)
            .filter_map(|p| p.file_name())
            .collect::<Vec<_>>()
    );

    std::fs::remove_file(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    log::info!("Cleaned up {}", archive_path.display());

    Ok(extracted)
}

/// Decompresses every `.gz` file directly inside `dir` next to itself and
/// deletes the compressed copy. Returns the decompressed paths, sorted.
///
/// A directory without `.gz` files is a no-op.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the directory cannot be listed or a member
/// cannot be decompressed.
pub fn expand_nested(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut compressed = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ArchiveError::io(dir, e))? {
        let path = entry.map_err(|e| ArchiveError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "gz") {
            compressed.push(path);
        }
    }
    compressed.sort();

    let mut expanded = Vec::with_capacity(compressed.len());
    for gz in compressed {
        expanded.push(gunzip(&gz)?);
    }

    Ok(expanded)
}

/// Replaces `path` (`*.gz`) with its decompressed payload, returning the
/// new path (the same name without `.gz`).
///
/// # Errors
///
/// Returns [`ArchiveError`] if the file is not valid gzip or the output
/// cannot be written.
pub fn gunzip(path: &Path) -> Result<PathBuf, ArchiveError> {
    let out = path.with_extension("");

    let input = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut decoder = GzDecoder::new(input);
    let mut output = File::create(&out).map_err(|e| ArchiveError::io(&out, e))?;

    if let Err(e) = io::copy(&mut decoder, &mut output) {
        drop(output);
        let _ = std::fs::remove_file(&out);
        return Err(ArchiveError::io(path, e));
    }

    std::fs::remove_file(path).map_err(|e| ArchiveError::io(path, e))?;
    log::debug!("Expanded {} -> {}", path.display(), out.display());

    Ok(out)
}

/// Errors from archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Archive file not found.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// I/O error while reading the archive or writing a member.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
