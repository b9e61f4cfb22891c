#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Run controller: ingest then convert, one source at a time.
//!
//! For each selected source the controller moves through
//! `Idle -> Ingesting(source) -> Converting(source) -> Done`. A failing stage
//! stops the stages that depend on it for that source only; the next source
//! still runs. Nothing is kept between runs, so a failed source or date is
//! retried by running it again.

use std::fmt;
use std::sync::Arc;

use snow_cover_convert::{ConvertError, Converter};
use snow_cover_source::config::PipelineConfig;
use snow_cover_source::progress::{ProgressCallback, null_progress};
use snow_cover_source::{FetchReport, SnowSource, SourceError, registry};
use snow_cover_source_models::{ConvertedArtifact, IngestDate, SourceId};
use tokio_util::sync::CancellationToken;

/// Which stages a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Download (and extract) only.
    Ingest,
    /// Convert what is already on disk.
    Convert,
    /// Ingest, then convert.
    Run,
}

impl RunMode {
    /// Whether the ingest stage runs.
    #[must_use]
    pub const fn ingests(self) -> bool {
        matches!(self, Self::Ingest | Self::Run)
    }

    /// Whether the convert stage runs.
    #[must_use]
    pub const fn converts(self) -> bool {
        matches!(self, Self::Convert | Self::Run)
    }
}

/// Where the controller is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing started yet.
    Idle,
    /// Fetching and extracting a source.
    Ingesting(SourceId),
    /// Converting a source's raw files.
    Converting(SourceId),
    /// Every selected source has been handled.
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Ingesting(source) => write!(f, "ingesting {source}"),
            Self::Converting(source) => write!(f, "converting {source}"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A stage failure for one source.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Fetch or extraction failed; conversion was not attempted.
    #[error("{source_id} ingest failed: {error}")]
    Ingest {
        /// Failing source.
        source_id: SourceId,
        /// Underlying error.
        #[source]
        error: SourceError,
    },

    /// Conversion failed.
    #[error("{source_id} conversion failed: {error}")]
    Convert {
        /// Failing source.
        source_id: SourceId,
        /// Underlying error.
        #[source]
        error: ConvertError,
    },
}

impl RunError {
    /// Whether the failure was a cancellation rather than a real error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Ingest {
                error: SourceError::Cancelled,
                ..
            } | Self::Convert {
                error: ConvertError::Cancelled,
                ..
            }
        )
    }
}

/// What happened to one source.
#[derive(Debug)]
pub struct SourceOutcome {
    /// The source.
    pub source: SourceId,
    /// Ingest report, when ingest ran and succeeded.
    pub fetched: Option<FetchReport>,
    /// GeoTIFFs, when conversion ran and succeeded.
    pub converted: Option<Vec<ConvertedArtifact>>,
    /// The stage failure, if any.
    pub error: Option<RunError>,
}

impl SourceOutcome {
    const fn new(source: SourceId) -> Self {
        Self {
            source,
            fetched: None,
            converted: None,
            error: None,
        }
    }
}

/// Result of one run.
#[derive(Debug)]
pub struct RunSummary {
    /// Date that was processed.
    pub date: IngestDate,
    /// Per-source outcomes, in processing order.
    pub outcomes: Vec<SourceOutcome>,
    /// Every state the controller entered, starting with [`RunState::Idle`].
    pub transitions: Vec<RunState>,
    /// `true` if the run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// `true` when every source finished without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(|o| o.error.is_none())
    }

    /// The failures, in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &RunError> {
        self.outcomes.iter().filter_map(|o| o.error.as_ref())
    }
}

/// Creates a progress reporter for a labelled unit of work.
pub type ProgressFactory = Arc<dyn Fn(String) -> Arc<dyn ProgressCallback> + Send + Sync>;

/// Sequences ingest and conversion across sources.
pub struct RunController {
    sources: Vec<Box<dyn SnowSource>>,
    converter: Converter,
    progress: ProgressFactory,
}

impl RunController {
    /// Creates a controller for `sources`, processed in the given order.
    #[must_use]
    pub fn new(sources: Vec<Box<dyn SnowSource>>, converter: Converter) -> Self {
        Self {
            sources,
            converter,
            progress: Arc::new(|_: String| null_progress()),
        }
    }

    /// Builds the adapters for `ids` and a `gdal_translate` converter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if an adapter cannot be created.
    pub fn from_config(config: &PipelineConfig, ids: &[SourceId]) -> Result<Self, SourceError> {
        let sources = ids
            .iter()
            .map(|id| registry::source_for(*id, config))
            .collect::<Result<Vec<_>, _>>()?;
        let converter = Converter::with_gdal(config.layout(), config.convert.clone());

        Ok(Self::new(sources, converter))
    }

    /// Reports progress through `factory` instead of discarding it.
    #[must_use]
    pub fn with_progress<F>(mut self, factory: F) -> Self
    where
        F: Fn(String) -> Arc<dyn ProgressCallback> + Send + Sync + 'static,
    {
        self.progress = Arc::new(factory);
        self
    }

    /// Runs `mode` for `date` over every source.
    ///
    /// Never fails as a whole: stage failures are recorded per source in
    /// the returned [`RunSummary`].
    pub async fn run(
        &self,
        date: IngestDate,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary {
            date,
            outcomes: Vec::with_capacity(self.sources.len()),
            transitions: vec![RunState::Idle],
            cancelled: false,
        };

        for source in &self.sources {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let outcome = self
                .run_source(
                    source.as_ref(),
                    date,
                    mode,
                    cancel,
                    &mut summary.transitions,
                )
                .await;
            if let Some(error) = &outcome.error {
                if error.is_cancelled() {
                    summary.cancelled = true;
                }
                log::error!("{error}");
            }
            summary.outcomes.push(outcome);

            if summary.cancelled {
                break;
            }
        }

        enter(&mut summary.transitions, RunState::Done);
        summary
    }

    async fn run_source(
        &self,
        source: &dyn SnowSource,
        date: IngestDate,
        mode: RunMode,
        cancel: &CancellationToken,
        transitions: &mut Vec<RunState>,
    ) -> SourceOutcome {
        let id = source.id();
        let mut outcome = SourceOutcome::new(id);

        if mode.ingests() {
            enter(transitions, RunState::Ingesting(id));
            let progress = (self.progress)(format!("{id} {date}: downloading"));

            match source.ingest(date, &progress, cancel).await {
                Ok(report) => {
                    let nothing_to_do = report.nothing_to_do();
                    outcome.fetched = Some(report);
                    if nothing_to_do {
                        log::info!("{id} {date}: nothing to ingest, skipping conversion");
                        return outcome;
                    }
                }
                Err(error) => {
                    outcome.error = Some(RunError::Ingest {
                        source_id: id,
                        error,
                    });
                    return outcome;
                }
            }
        }

        if mode.converts() {
            enter(transitions, RunState::Converting(id));
            let progress = (self.progress)(format!("{id} {date}: converting"));

            match self.converter.convert(id, date, &progress, cancel).await {
                Ok(converted) => outcome.converted = Some(converted),
                Err(error) => {
                    outcome.error = Some(RunError::Convert {
                        source_id: id,
                        error,
                    });
                }
            }
        }

        outcome
    }
}

fn enter(transitions: &mut Vec<RunState>, state: RunState) {
    log::debug!("Run state -> {state}");
    transitions.push(state);
}

/// Parses a source selection: `all` or a comma-separated list of source
/// ids. Order follows [`SourceId::ALL`], duplicates are dropped.
///
/// # Errors
///
/// Returns a message naming the first unknown id.
pub fn parse_source_selection(selection: &str) -> Result<Vec<SourceId>, String> {
    let selection = selection.trim();
    if selection.eq_ignore_ascii_case("all") {
        return Ok(SourceId::ALL.to_vec());
    }

    let mut requested = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: SourceId = part
            .parse()
            .map_err(|_| format!("unknown source '{part}' (expected all, ndsi or snodas)"))?;
        requested.push(id);
    }
    if requested.is_empty() {
        return Err("no source given".to_string());
    }

    Ok(SourceId::ALL
        .iter()
        .copied()
        .filter(|id| requested.contains(id))
        .collect())
}
