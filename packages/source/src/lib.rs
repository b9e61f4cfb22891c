#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Snow-cover source adapters.
//!
//! Each remote archive implements the [`SnowSource`] trait: it knows how to
//! build its remote reference for a date, download the raw files into the
//! date-partitioned layout from [`paths`], and optionally extract them.
//!
//! * [`ndsi`] scrapes a listing page for `.hdf` links and follows each one
//!   through a signed redirect.
//! * [`snodas`] downloads a single daily `.tar`, keeps only the selected
//!   product members and expands their gzip compression.

pub mod archive;
pub mod config;
pub mod credentials;
pub mod download;
pub mod ndsi;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod snodas;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use snow_cover_source_models::{IngestDate, RawArtifact, SourceId};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveError;
use crate::config::HttpConfig;
use crate::progress::ProgressCallback;

/// Errors that can occur while fetching or extracting source data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP transport failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status the caller cannot use.
    #[error("HTTP {status} for {url}: {excerpt}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
        /// Start of the response body.
        excerpt: String,
    },

    /// A download kept redirecting past the hop limit.
    #[error("Too many redirects starting at {url}")]
    TooManyRedirects {
        /// First URL of the chain.
        url: String,
    },

    /// I/O error (file read/write).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Archive could not be read or unpacked.
    #[error("Extraction failed: {0}")]
    Archive(#[from] ArchiveError),

    /// Extraction finished but left nothing the converter can use.
    #[error("No usable {expected} file in {dir}")]
    NoUsableInput {
        /// Directory that was searched.
        dir: String,
        /// Extension that was expected.
        expected: String,
    },

    /// Missing or invalid configuration (credentials, config file).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The run was cancelled before the operation finished.
    #[error("Cancelled")]
    Cancelled,
}

impl SourceError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Where a source's data for one date lives remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteReference {
    /// Listing page or direct download URL.
    pub url: String,
    /// Local file name, when the remote layout determines it up front.
    pub file_name: Option<String>,
}

/// Outcome of ingesting one source for one date.
///
/// `attempted` counts the remote files the source tried to download and
/// `succeeded` how many of them made it to disk. Zero attempts means there
/// was nothing to do, which is not the same as every attempt failing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Files present on disk after the operation.
    pub artifacts: Vec<RawArtifact>,
    /// Remote files the source tried to fetch.
    pub attempted: usize,
    /// Remote files fetched successfully.
    pub succeeded: usize,
}

impl FetchReport {
    /// A report for a date with nothing to download.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            artifacts: Vec::new(),
            attempted: 0,
            succeeded: 0,
        }
    }

    /// Returns `true` if nothing was discovered remotely.
    #[must_use]
    pub const fn nothing_to_do(&self) -> bool {
        self.attempted == 0
    }
}

/// Trait that every snow-cover archive implements.
///
/// Sources share the fetch -> extract shape but differ in how they locate
/// remote files: NDSI scrapes a listing page while SNODAS builds its
/// archive URL from the date alone.
#[async_trait]
pub trait SnowSource: Send + Sync {
    /// Which archive this is.
    fn id(&self) -> SourceId;

    /// Builds the remote listing or download URL for `date`. Performs no I/O.
    fn build_remote_reference(&self, date: IngestDate) -> RemoteReference;

    /// Downloads the raw files for `date` into the raw partition.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the date cannot be ingested at all.
    /// Sources that fetch many independent files report per-file failures
    /// through [`FetchReport`] instead.
    async fn fetch_raw(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, SourceError>;

    /// Turns one downloaded artifact into the files the converter consumes.
    ///
    /// The default keeps the artifact as-is.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if extraction fails.
    async fn extract(&self, artifact: RawArtifact) -> Result<Vec<RawArtifact>, SourceError> {
        Ok(vec![artifact])
    }

    /// Fetches and then extracts every downloaded artifact, in that order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] from either step.
    async fn ingest(
        &self,
        date: IngestDate,
        progress: &Arc<dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, SourceError> {
        let fetched = self.fetch_raw(date, progress, cancel).await?;

        let mut artifacts = Vec::with_capacity(fetched.artifacts.len());
        for artifact in fetched.artifacts {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            artifacts.extend(self.extract(artifact).await?);
        }

        Ok(FetchReport {
            artifacts,
            ..fetched
        })
    }
}

/// Builds an HTTP client honouring the configured timeouts.
///
/// With `follow_redirects` disabled the client hands 3xx responses back to
/// the caller, which is how NDSI links expose their signed download URL
/// and how [`download::follow_redirects`] re-authorizes each hop. The
/// client keeps a cookie jar so a login session set during one hop is
/// presented on the next.
///
/// # Errors
///
/// Returns [`SourceError::Http`] if the TLS backend cannot be initialised.
pub fn http_client(config: &HttpConfig, follow_redirects: bool) -> Result<reqwest::Client, SourceError> {
    let redirect = if follow_redirects {
        reqwest::redirect::Policy::limited(10)
    } else {
        reqwest::redirect::Policy::none()
    };

    Ok(reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(redirect)
        .cookie_store(true)
        .build()?)
}
