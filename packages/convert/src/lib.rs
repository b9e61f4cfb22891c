#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Conversion of raw snow-cover files into GeoTIFFs.
//!
//! [`Converter`] finds the raw inputs for a (source, date) in the data
//! layout and runs the translation tool once per input:
//!
//! * NDSI tiles name the snow-cover subdataset; their georeferencing comes
//!   from the HDF-EOS grid itself.
//! * SNODAS grids get an ENVI header written next to them first, then are
//!   tagged with [`SNODAS_GEOREFERENCE`].
//!
//! A date's conversion stops at the first failing input. Outputs that
//! already exist are left alone.

pub mod command;
pub mod header;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use snow_cover_source::config::ConvertConfig;
use snow_cover_source::paths::{self, DataLayout};
use snow_cover_source::progress::ProgressCallback;
use snow_cover_source_models::{
    ArtifactFormat, ConvertedArtifact, IngestDate, SNODAS_ENVI_HEADER, SNODAS_GEOREFERENCE,
    SourceId,
};
use tokio_util::sync::CancellationToken;

pub use crate::command::{GdalTranslate, TranslateCommand, Translator};

/// Errors that can occur during conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The raw directory holds no file of the expected kind.
    #[error("No .{expected} input for {source_id} in {dir}")]
    MissingInput {
        /// Source being converted.
        source_id: SourceId,
        /// Raw directory that was searched.
        dir: String,
        /// Expected extension.
        expected: &'static str,
    },

    /// The translation tool ran and reported failure.
    #[error("{program} failed ({status}): {stderr}")]
    ConversionTool {
        /// Program that failed.
        program: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// A sidecar header already exists where a new one would be written.
    #[error("Header already exists: {path}")]
    HeaderCollision {
        /// Existing header.
        path: String,
    },

    /// I/O error (directory listing, file creation).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The translation tool could not be started or waited on.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that could not be run.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The run was cancelled before conversion finished.
    #[error("Cancelled")]
    Cancelled,
}

impl ConvertError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Converts the raw files of one date into GeoTIFFs.
pub struct Converter {
    layout: DataLayout,
    config: ConvertConfig,
    translator: Arc<dyn Translator>,
}

impl Converter {
    /// Creates a converter that runs commands through `translator`.
    #[must_use]
    pub fn new(layout: DataLayout, config: ConvertConfig, translator: Arc<dyn Translator>) -> Self {
        Self {
            layout,
            config,
            translator,
        }
    }

    /// Creates a converter that spawns [`ConvertConfig::program`].
    #[must_use]
    pub fn with_gdal(layout: DataLayout, config: ConvertConfig) -> Self {
        Self::new(layout, config, Arc::new(GdalTranslate))
    }

    /// Converts `source`'s raw files for `date`.
    ///
    /// # Errors
    ///
    /// See [`Self::convert_ndsi`] and [`Self::convert_snodas`].
    pub async fn convert(
        &self,
        source: SourceId,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConvertedArtifact>, ConvertError> {
        match source {
            SourceId::Ndsi => self.convert_ndsi(date, progress, cancel).await,
            SourceId::Snodas => self.convert_snodas(date, progress, cancel).await,
        }
    }

    /// Extracts the snow-cover subdataset of every `.hdf` tile for `date`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingInput`] if there are no tiles, or the
    /// first failure among the tiles.
    pub async fn convert_ndsi(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConvertedArtifact>, ConvertError> {
        self.convert_all(SourceId::Ndsi, date, progress, cancel)
            .await
    }

    /// Writes the ENVI header for every `.dat` grid for `date` and wraps
    /// it as a georeferenced GeoTIFF.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingInput`] if there is no grid,
    /// [`ConvertError::HeaderCollision`] if a header is already present, or
    /// the tool failure.
    pub async fn convert_snodas(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConvertedArtifact>, ConvertError> {
        self.convert_all(SourceId::Snodas, date, progress, cancel)
            .await
    }

    async fn convert_all(
        &self,
        source: SourceId,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ConvertedArtifact>, ConvertError> {
        let inputs = self.inputs(source, date).await?;
        let out_dir = self.layout.converted_dir(source, date);
        paths::ensure_dir(&out_dir)
            .await
            .map_err(|e| ConvertError::io(&out_dir, e))?;

        progress.set_total(inputs.len() as u64);
        let mut converted = Vec::with_capacity(inputs.len());

        for input in inputs {
            if cancel.is_cancelled() {
                return Err(ConvertError::Cancelled);
            }

            let output = out_dir.join(input.with_extension("tif").file_name().unwrap_or_default());
            if let Some(name) = input.file_name() {
                progress.set_message(name.to_string_lossy().into_owned());
            }

            let reused = tokio::fs::try_exists(&output).await.unwrap_or(false);
            if reused {
                log::info!("{} already exists, skipping", output.display());
            } else {
                let (command, written_header) = match source {
                    SourceId::Ndsi => (TranslateCommand::ndsi(&self.config, &input, &output), None),
                    SourceId::Snodas => (
                        TranslateCommand::georeferenced(
                            &self.config,
                            &SNODAS_GEOREFERENCE,
                            &input,
                            &output,
                        ),
                        Some(header::write_envi_header(&input, &SNODAS_ENVI_HEADER).await?),
                    ),
                };

                if let Err(e) = self.translator.translate(&command, cancel).await {
                    // Only a header written by this attempt is removed.
                    if let Some(path) = written_header {
                        header::remove_envi_header(&path).await;
                    }
                    return Err(e);
                }
                log::info!("Converted {} -> {}", input.display(), output.display());
            }

            progress.inc(1);
            converted.push(ConvertedArtifact {
                path: output,
                source,
                date,
                input,
                reused,
            });
        }

        progress.finish(format!(
            "{source} {date}: {} GeoTIFF(s)",
            converted.len()
        ));

        Ok(converted)
    }

    /// Raw files of the kind `source` converts, sorted by name.
    async fn inputs(&self, source: SourceId, date: IngestDate) -> Result<Vec<PathBuf>, ConvertError> {
        let (format, expected) = match source {
            SourceId::Ndsi => (ArtifactFormat::TagFormat, "hdf"),
            SourceId::Snodas => (ArtifactFormat::RawBinary, "dat"),
        };
        let dir = self.layout.raw_dir(source, date);
        let missing = || ConvertError::MissingInput {
            source_id: source,
            dir: dir.display().to_string(),
            expected,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(ConvertError::io(&dir, e)),
        };

        let mut inputs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConvertError::io(&dir, e))?
        {
            let path = entry.path();
            if ArtifactFormat::from_path(&path) == Some(format) && path.is_file() {
                inputs.push(path);
            }
        }

        if inputs.is_empty() {
            log::error!("No .{expected} files found in {}", dir.display());
            return Err(missing());
        }
        inputs.sort();

        Ok(inputs)
    }
}
