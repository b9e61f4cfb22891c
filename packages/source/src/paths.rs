//! Date-partitioned on-disk layout.
//!
//! Every file lives under
//! `<data_dir>/<source>/<stage>/<YYYY>/<month>/<DD>/`, where `<month>` is
//! `MM` or, for raw SNODAS files, the archive's `MM_Mon` grouping.
//! Resolution is pure; directories are only created by [`ensure_dir`].

use std::path::{Path, PathBuf};

use snow_cover_source_models::{IngestDate, MonthStyle, SourceId, Stage};

/// Resolves the directory for `date` under a source's base directory.
///
/// `raw` and `converted` never share a directory because the stage is a
/// path component.
#[must_use]
pub fn resolve(date: IngestDate, source_base: &Path, stage: Stage, month: MonthStyle) -> PathBuf {
    source_base
        .join(stage.as_ref())
        .join(date.year_segment())
        .join(month.segment(date))
        .join(date.day_segment())
}

/// Creates `path` and its parents if they do not exist yet.
///
/// Safe to call repeatedly.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// The root of the local data tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Creates a layout rooted at `root` (usually `data/`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<source>`
    #[must_use]
    pub fn source_base(&self, source: SourceId) -> PathBuf {
        self.root.join(source.as_ref())
    }

    /// Directory holding `source`'s files for `date` at `stage`.
    #[must_use]
    pub fn dir(&self, source: SourceId, stage: Stage, date: IngestDate) -> PathBuf {
        resolve(
            date,
            &self.source_base(source),
            stage,
            source.month_style(stage),
        )
    }

    /// Shorthand for the raw directory.
    #[must_use]
    pub fn raw_dir(&self, source: SourceId, date: IngestDate) -> PathBuf {
        self.dir(source, Stage::Raw, date)
    }

    /// Shorthand for the converted directory.
    #[must_use]
    pub fn converted_dir(&self, source: SourceId, date: IngestDate) -> PathBuf {
        self.dir(source, Stage::Converted, date)
    }
}
