//! Pipeline configuration.
//!
//! Loaded from a TOML file when one is given, otherwise from the built-in
//! `config/default.toml` embedded at compile time. Keys a file leaves out
//! fall back to the [`Default`] impls below. The data directory can be
//! overridden with the `SNOW_COVER_DATA_DIR` environment variable.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snow_cover_source_models::{ExtractionFilter, SnodasProduct};

use crate::SourceError;
use crate::paths::DataLayout;
use crate::retry::RetryPolicy;

/// The built-in configuration used when no file is given.
pub const BUILTIN_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable that overrides [`PipelineConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "SNOW_COVER_DATA_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root of the date-partitioned data tree.
    pub data_dir: PathBuf,
    /// Shared HTTP behaviour.
    pub http: HttpConfig,
    /// NDSI listing and download settings.
    pub ndsi: NdsiConfig,
    /// SNODAS archive settings.
    pub snodas: SnodasConfig,
    /// External translation tool settings.
    pub convert: ConvertConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            http: HttpConfig::default(),
            ndsi: NdsiConfig::default(),
            snodas: SnodasConfig::default(),
            convert: ConvertConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Configuration`] on invalid TOML or unknown keys.
    pub fn from_toml(toml_str: &str) -> Result<Self, SourceError> {
        toml::de::from_str(toml_str).map_err(|e| SourceError::Configuration(e.to_string()))
    }

    /// Loads the configuration from `path`, or [`BUILTIN_CONFIG`] when
    /// `None`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Configuration`] if the file cannot be read or
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, SourceError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    SourceError::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::from_toml(BUILTIN_CONFIG)?,
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV)
            && !dir.trim().is_empty()
        {
            log::debug!("Using data directory from {DATA_DIR_ENV}: {dir}");
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// The on-disk layout rooted at [`Self::data_dir`].
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// HTTP client and retry settings applied to every network fetch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Whole-request timeout, including the body.
    pub timeout_secs: u64,
    /// TCP/TLS connect timeout.
    pub connect_timeout_secs: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay_ms: u64,
    /// `User-Agent` header.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            connect_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 2_000,
            user_agent: format!("snow-cover-ingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// The retry policy described by this config.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }
}

/// NDSI (MODIS snow cover) listing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NdsiConfig {
    /// Listing base; `/<YYYY>/<MM>/<DD>/` is appended per date.
    pub listing_base_url: String,
    /// Only hrefs ending in this suffix are downloaded.
    pub link_extension: String,
    /// Maximum simultaneous link downloads.
    pub concurrency: usize,
    /// Host whose netrc credentials authorize requests.
    pub credential_machine: String,
    /// Netrc file; defaults to `$HOME/.netrc`.
    pub netrc_path: Option<PathBuf>,
}

impl Default for NdsiConfig {
    fn default() -> Self {
        Self {
            listing_base_url: "https://cmr.earthdata.nasa.gov/virtual-directory/collections/C3028765772-NSIDC_CPRD/temporal".to_string(),
            link_extension: ".hdf".to_string(),
            concurrency: 4,
            credential_machine: "urs.earthdata.nasa.gov".to_string(),
            netrc_path: None,
        }
    }
}

/// SNODAS archive settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnodasConfig {
    /// Archive base; `/<YYYY>/<MM_Mon>/SNODAS_unmasked_<YYYYMMDD>.tar` is
    /// appended per date.
    pub archive_base_url: String,
    /// Member-name keywords to keep when extracting.
    pub keep_keywords: Vec<String>,
}

impl Default for SnodasConfig {
    fn default() -> Self {
        Self {
            archive_base_url: "https://noaadata.apps.nsidc.org/NOAA/G02158/unmasked".to_string(),
            keep_keywords: vec![SnodasProduct::SnowWaterEquivalent.code().to_string()],
        }
    }
}

impl SnodasConfig {
    /// The extraction filter built from [`Self::keep_keywords`].
    #[must_use]
    pub fn filter(&self) -> ExtractionFilter {
        ExtractionFilter::new(self.keep_keywords.iter().cloned())
    }
}

/// External raster translation tool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// Program to invoke.
    pub program: String,
    /// GDAL driver prefix for the NDSI subdataset name.
    pub ndsi_driver: String,
    /// HDF-EOS grid holding the NDSI layer.
    pub ndsi_grid: String,
    /// Subdataset extracted from each NDSI tile.
    pub ndsi_subdataset: String,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            program: "gdal_translate".to_string(),
            ndsi_driver: "HDF4_EOS:EOS_GRID".to_string(),
            ndsi_grid: "MOD_Grid_Snow_500m".to_string(),
            ndsi_subdataset: "MOD10A1_NDSI_Snow_Cover".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = PipelineConfig::from_toml(BUILTIN_CONFIG).unwrap();
        let mut expected = PipelineConfig::default();
        // The shipped file pins a version-free agent string.
        expected.http.user_agent.clone_from(&shipped.http.user_agent);
        assert_eq!(shipped, expected);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            data_dir = "/srv/snow"

            [snodas]
            keep_keywords = ["11034", "11036"]
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/snow"));
        assert_eq!(config.snodas.keep_keywords, ["11034", "11036"]);
        assert_eq!(config.ndsi, NdsiConfig::default());
        assert_eq!(config.http.max_retries, 3);
        assert!(config.snodas.filter().matches("us_ssmv11036tS__T0001.dat.gz"));
    }

    #[test]
    fn unknown_keys_are_configuration_errors() {
        let err = PipelineConfig::from_toml("[ndsi]\nlisting_url = \"x\"\n").unwrap_err();
        assert!(matches!(err, SourceError::Configuration(_)));
    }

    #[test]
    fn load_without_file_uses_builtin_config() {
        let config = PipelineConfig::load(None).unwrap();
        let builtin = PipelineConfig::from_toml(BUILTIN_CONFIG).unwrap();

        assert_eq!(config.http, builtin.http);
        assert_eq!(config.http.user_agent, "snow-cover-ingest");
        assert_eq!(config.convert.program, "gdal_translate");
        assert_eq!(config.ndsi.link_extension, ".hdf");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/snow.toml"))).unwrap_err();
        assert!(matches!(err, SourceError::Configuration(_)));
    }
}
