//! Invocation of the external raster translation tool.
//!
//! [`TranslateCommand`] is the exact argv handed to the tool, built per
//! source. [`Translator`] runs it; [`GdalTranslate`] spawns the real
//! program, tests substitute a recording fake.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use snow_cover_source::config::ConvertConfig;
use snow_cover_source_models::GeoReference;
use tokio_util::sync::CancellationToken;

use crate::ConvertError;

/// Program and arguments for one translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments, passed without shell interpretation.
    pub args: Vec<String>,
}

impl TranslateCommand {
    /// Extracts the NDSI subdataset of an HDF4-EOS tile:
    /// `<program> <driver>:<input>:<grid>:<subdataset> <output>`.
    #[must_use]
    pub fn ndsi(config: &ConvertConfig, input: &Path, output: &Path) -> Self {
        Self {
            program: config.program.clone(),
            args: vec![
                format!(
                    "{}:{}:{}:{}",
                    config.ndsi_driver,
                    input.display(),
                    config.ndsi_grid,
                    config.ndsi_subdataset
                ),
                output.display().to_string(),
            ],
        }
    }

    /// Wraps a headerless binary grid as a GeoTIFF with explicit
    /// coordinate system, nodata value and corners.
    #[must_use]
    pub fn georeferenced(
        config: &ConvertConfig,
        geo: &GeoReference,
        input: &Path,
        output: &Path,
    ) -> Self {
        let mut args = vec![
            "-of".to_string(),
            "GTiff".to_string(),
            "-a_srs".to_string(),
            geo.srs.to_string(),
            "-a_nodata".to_string(),
            geo.nodata.to_string(),
        ];
        if let Some(bounds) = geo.bounds {
            args.extend(
                ["-a_ullr", bounds.ulx, bounds.uly, bounds.lrx, bounds.lry].map(str::to_string),
            );
        }
        args.push(input.display().to_string());
        args.push(output.display().to_string());

        Self {
            program: config.program.clone(),
            args,
        }
    }

    /// The output path (last argument).
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl std::fmt::Display for TranslateCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Runs translation commands.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Runs `command` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::ConversionTool`] when the tool exits
    /// unsuccessfully, [`ConvertError::Spawn`] when it cannot be started
    /// and [`ConvertError::Cancelled`] when `cancel` fires first.
    async fn translate(
        &self,
        command: &TranslateCommand,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError>;
}

/// Spawns the configured program (normally `gdal_translate`).
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalTranslate;

#[async_trait]
impl Translator for GdalTranslate {
    async fn translate(
        &self,
        command: &TranslateCommand,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        log::debug!("Running {command}");

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConvertError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        // Dropping the child on cancellation kills it.
        let waited = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConvertError::Cancelled),
            output = child.wait_with_output() => output,
        };
        let output = waited.map_err(|source| ConvertError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        log::error!("{} failed ({}): {stderr}", command.program, output.status);

        Err(ConvertError::ConversionTool {
            program: command.program.clone(),
            status: output.status.to_string(),
            stderr,
        })
    }
}
