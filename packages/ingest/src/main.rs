#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the snow-cover ingestion tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use snow_cover_cli_utils::{IndicatifProgress, MultiProgress};
use snow_cover_ingest::{RunController, RunMode, parse_source_selection};
use snow_cover_source::config::PipelineConfig;
use snow_cover_source::{SourceError, credentials, registry};
use snow_cover_source_models::{IngestDate, SourceId};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "snow_cover_ingest", about = "Snow-cover raster ingestion tool")]
struct Cli {
    /// Pipeline configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON-lines log file, appended to on every run.
    #[arg(long, global = true, default_value = snow_cover_cli_utils::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Log to the console only.
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and extract raw files
    Ingest(StageArgs),
    /// Convert raw files already on disk to GeoTIFF
    Convert(StageArgs),
    /// Ingest, then convert
    Run(StageArgs),
}

#[derive(Args)]
struct StageArgs {
    /// `all`, or a comma-separated list of sources (`ndsi`, `snodas`)
    #[arg(default_value = "all")]
    sources: String,
    /// Day to process (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<IngestDate>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    let multi = snow_cover_cli_utils::init_logger(log_file);

    match run(cli, multi).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, multi: MultiProgress) -> Result<bool, Box<dyn std::error::Error>> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    let (mode, args) = match cli.command {
        Commands::Ingest(args) => (RunMode::Ingest, args),
        Commands::Convert(args) => (RunMode::Convert, args),
        Commands::Run(args) => (RunMode::Run, args),
    };
    let date = args.date.unwrap_or_else(IngestDate::today);
    let sources = parse_source_selection(&args.sources)?;

    if mode.ingests() && sources.contains(&SourceId::Ndsi) {
        bootstrap_credentials(&config)?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted, cancelling...");
                cancel.cancel();
            }
        }
    });

    let controller = RunController::from_config(&config, &sources)?
        .with_progress(move |label| IndicatifProgress::files_bar(&multi, &label));

    log::info!(
        "Processing {date} ({}) into {}",
        sources
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(", "),
        config.data_dir.display()
    );
    let start = Instant::now();
    let summary = controller.run(date, mode, &cancel).await;
    let elapsed = start.elapsed();

    for outcome in &summary.outcomes {
        if let Some(report) = &outcome.fetched {
            log::info!(
                "{}: {} of {} file(s) fetched",
                outcome.source,
                report.succeeded,
                report.attempted
            );
        }
        if let Some(converted) = &outcome.converted {
            let reused = converted.iter().filter(|c| c.reused).count();
            log::info!(
                "{}: {} GeoTIFF(s), {reused} already present",
                outcome.source,
                converted.len()
            );
        }
    }

    if summary.is_success() {
        log::info!("Done in {elapsed:.1?}");
    } else {
        let failed = summary.failures().count();
        log::error!(
            "Finished with {failed} failure(s){} in {elapsed:.1?}",
            if summary.cancelled { " (cancelled)" } else { "" }
        );
    }

    Ok(summary.is_success())
}

/// Makes sure Earthdata credentials exist before any network activity.
fn bootstrap_credentials(config: &PipelineConfig) -> Result<(), SourceError> {
    let path = registry::netrc_path(config).ok_or_else(|| {
        SourceError::Configuration("HOME is not set and no ndsi.netrc_path configured".to_string())
    })?;
    credentials::ensure_netrc_from_env(&path, &config.ndsi.credential_machine)?;
    Ok(())
}
