#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the snow-cover tools.
//!
//! [`IndicatifProgress`] renders [`ProgressCallback`] updates as
//! `indicatif` bars, and [`init_logger`] routes `log` output through
//! `indicatif-log-bridge` so log lines do not tear the bars, optionally
//! copying it to a JSON-lines file.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::SecondsFormat;
use indicatif::{ProgressBar, ProgressStyle};
use log::{LevelFilter, Log, Metadata, Record};
use snow_cover_source::progress::ProgressCallback;

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] behind [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style used once the number of files is known.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// A bar counting files for one source and stage. Spins until
    /// [`ProgressCallback::set_total`] reports how many files there are.
    #[must_use]
    pub fn files_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {prefix} {wide_bar:.cyan/dim} {pos}/{len} [{elapsed_precise}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        bar.set_prefix(message.to_string());

        Arc::new(Self { bar, bar_style })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Default location of the JSON-lines log file.
pub const DEFAULT_LOG_FILE: &str = "logs/app.log";

/// Initializes the global logger wrapped in `indicatif-log-bridge`.
///
/// The console filter comes from `RUST_LOG` and defaults to `info`. When
/// `log_file` is given, every record at `info` and above (and `debug` from
/// the snow-cover crates) is also appended to it as one JSON object per
/// line. Returns the [`MultiProgress`] that progress bars must be added to.
#[must_use]
pub fn init_logger(log_file: Option<&Path>) -> MultiProgress {
    let multi = MultiProgress::new();

    let console = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .build();
    let console_level = console.filter();

    let (file, file_error) = match log_file.map(JsonLinesLogger::open).transpose() {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let level = if file.is_some() {
        console_level.max(JsonLinesLogger::LEVEL)
    } else {
        console_level
    };

    indicatif_log_bridge::LogWrapper::new(multi.clone(), TeeLogger { console, file })
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    if let (Some(path), Some(e)) = (log_file, file_error) {
        log::warn!("Not writing log file {}: {e}", path.display());
    }

    multi
}

/// Sends each record to the console logger and, if present, the log file.
struct TeeLogger<C> {
    console: C,
    file: Option<JsonLinesLogger>,
}

impl<C: Log> Log for TeeLogger<C> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.console.enabled(metadata) || self.file.as_ref().is_some_and(|f| f.enabled(metadata))
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.enabled(record.metadata()) {
            self.console.log(record);
        }
        if let Some(file) = &self.file {
            file.log(record);
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            file.flush();
        }
    }
}

/// Appends records to a file as JSON lines with `timestamp`, `level`,
/// `logger` and `message` keys.
struct JsonLinesLogger {
    file: Mutex<File>,
}

impl JsonLinesLogger {
    /// Most verbose level written for the snow-cover crates.
    const LEVEL: LevelFilter = LevelFilter::Debug;

    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn line(record: &Record<'_>) -> String {
        serde_json::json!({
            "timestamp": chrono::Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            "level": record.level().as_str(),
            "logger": record.target(),
            "message": record.args().to_string(),
        })
        .to_string()
    }
}

impl Log for JsonLinesLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        let max = if metadata.target().starts_with("snow_cover") {
            Self::LEVEL
        } else {
            LevelFilter::Info
        };
        metadata.level() <= max
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::line(record);
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn file_sink_writes_one_json_object_per_record() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/app.log");
        let logger = JsonLinesLogger::open(&path).unwrap();

        logger.log(
            &Record::builder()
                .level(log::Level::Info)
                .target("snow_cover_source::ndsi")
                .args(format_args!("Successfully downloaded 3 of 5 NDSI files."))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(log::Level::Error)
                .target("snow_cover_convert")
                .args(format_args!("No .dat files found"))
                .build(),
        );
        logger.flush();

        let lines = record_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["logger"], "snow_cover_source::ndsi");
        assert_eq!(lines[0]["message"], "Successfully downloaded 3 of 5 NDSI files.");
        assert!(lines[0]["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(lines[1]["level"], "ERROR");
    }

    #[test]
    fn file_sink_appends_across_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app.log");
        let record = |message| {
            let logger = JsonLinesLogger::open(&path).unwrap();
            logger.log(
                &Record::builder()
                    .level(log::Level::Warn)
                    .target("snow_cover_ingest")
                    .args(format_args!("{message}"))
                    .build(),
            );
        };

        record("first");
        record("second");

        let messages: Vec<_> = record_lines(&path)
            .into_iter()
            .map(|line| line["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, ["first", "second"]);
    }

    #[test]
    fn third_party_debug_stays_out_of_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app.log");
        let logger = JsonLinesLogger::open(&path).unwrap();

        logger.log(
            &Record::builder()
                .level(log::Level::Debug)
                .target("hyper_util::client")
                .args(format_args!("connecting"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(log::Level::Debug)
                .target("snow_cover_source::download")
                .args(format_args!("hop"))
                .build(),
        );

        let lines = record_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["message"], "hop");
    }
}
