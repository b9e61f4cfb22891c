//! SNODAS (Snow Data Assimilation System) adapter.
//!
//! One `.tar` per day at a URL derived from the date alone. The archive
//! bundles every modeled product; only members matching the configured
//! [`ExtractionFilter`] keywords are kept, and each kept member is gunzipped
//! in place so the converter finds plain `.dat`/`.txt` pairs.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use snow_cover_source_models::{ArtifactFormat, ExtractionFilter, IngestDate, RawArtifact, SourceId};
use tokio_util::sync::CancellationToken;

use crate::archive;
use crate::config::{HttpConfig, SnodasConfig};
use crate::paths::{self, DataLayout};
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use crate::{FetchReport, RemoteReference, SnowSource, SourceError, download, http_client};

/// Downloads and unpacks the daily SNODAS archive.
pub struct SnodasSource {
    layout: DataLayout,
    config: SnodasConfig,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl SnodasSource {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(
        layout: DataLayout,
        config: SnodasConfig,
        http: &HttpConfig,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            layout,
            config,
            policy: http.retry_policy(),
            client: http_client(http, true)?,
        })
    }

    /// `SNODAS_unmasked_<YYYYMMDD>.tar`
    #[must_use]
    pub fn archive_name(date: IngestDate) -> String {
        format!("SNODAS_unmasked_{}.tar", date.compact())
    }

    /// Archive URL and file name for `date`:
    /// `<base>/<YYYY>/<MM_Mon>/SNODAS_unmasked_<YYYYMMDD>.tar`.
    #[must_use]
    pub fn build_archive_reference(&self, date: IngestDate) -> RemoteReference {
        let name = Self::archive_name(date);
        RemoteReference {
            url: format!(
                "{}/{}/{}/{name}",
                self.config.archive_base_url.trim_end_matches('/'),
                date.year_segment(),
                date.month_name_segment(),
            ),
            file_name: Some(name),
        }
    }

    /// Downloads the archive for `date` into its raw directory.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the archive cannot be downloaded; no
    /// partial archive is left behind.
    pub async fn fetch_archive(
        &self,
        date: IngestDate,
        cancel: &CancellationToken,
    ) -> Result<RawArtifact, SourceError> {
        let reference = self.build_archive_reference(date);
        let dir = self.layout.raw_dir(SourceId::Snodas, date);
        paths::ensure_dir(&dir)
            .await
            .map_err(|e| SourceError::io(&dir, e))?;

        let url = Url::parse(&reference.url).map_err(|e| {
            SourceError::Configuration(format!("invalid SNODAS archive URL {}: {e}", reference.url))
        })?;
        let dest = dir.join(reference.file_name.unwrap_or_else(|| Self::archive_name(date)));
        log::info!("Downloading {url}");

        let bytes = download::download_file(&self.policy, cancel, &dest, &url, |url| {
            self.client.get(url.clone())
        })
        .await
        .inspect_err(|e| log::error!("SNODAS archive download failed for {date}: {e}"))?;

        log::info!("Downloaded {} ({bytes} bytes)", dest.display());

        Ok(RawArtifact::new(
            dest,
            SourceId::Snodas,
            date,
            ArtifactFormat::Archive,
        ))
    }

    /// The filter applied to archive members.
    #[must_use]
    pub fn filter(&self) -> ExtractionFilter {
        self.config.filter()
    }
}

#[async_trait]
impl SnowSource for SnodasSource {
    fn id(&self) -> SourceId {
        SourceId::Snodas
    }

    fn build_remote_reference(&self, date: IngestDate) -> RemoteReference {
        self.build_archive_reference(date)
    }

    async fn fetch_raw(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, SourceError> {
        progress.set_total(1);
        progress.set_message(Self::archive_name(date));

        let archive = self.fetch_archive(date, cancel).await?;

        progress.inc(1);
        progress.finish(format!("SNODAS {date}: archive downloaded"));

        Ok(FetchReport {
            artifacts: vec![archive],
            attempted: 1,
            succeeded: 1,
        })
    }

    /// Keeps the filtered members of an archive, expands their gzip layer
    /// and returns what is left. Non-archive artifacts pass through.
    async fn extract(&self, artifact: RawArtifact) -> Result<Vec<RawArtifact>, SourceError> {
        if artifact.format != ArtifactFormat::Archive {
            return Ok(vec![artifact]);
        }

        let dir = self.layout.raw_dir(SourceId::Snodas, artifact.date);
        let filter = self.filter();
        let archive_path = artifact.path.clone();
        let dest = dir.clone();

        let files: Vec<PathBuf> = tokio::task::spawn_blocking(move || {
            let extracted = archive::extract_selected(&archive_path, &filter, &dest)?;
            archive::expand_nested(&dest)?;
            Ok::<_, archive::ArchiveError>(
                extracted
                    .into_iter()
                    .map(|path| {
                        if path.extension().is_some_and(|ext| ext == "gz") {
                            path.with_extension("")
                        } else {
                            path
                        }
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| SourceError::io(&dir, std::io::Error::other(e)))??;

        let mut artifacts: Vec<RawArtifact> = files
            .into_iter()
            .filter_map(|path| RawArtifact::from_path(path, SourceId::Snodas, artifact.date))
            .collect();
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));

        if !artifacts
            .iter()
            .any(|a| a.format == ArtifactFormat::RawBinary)
        {
            log::error!(
                "No .dat member matching {:?} in {}",
                self.config.keep_keywords,
                artifact.path.display()
            );
            return Err(SourceError::NoUsableInput {
                dir: dir.display().to_string(),
                expected: "dat".to_string(),
            });
        }

        Ok(artifacts)
    }
}
