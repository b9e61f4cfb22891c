//! Builds the [`SnowSource`] implementation for each [`SourceId`].

use snow_cover_source_models::SourceId;

use crate::config::PipelineConfig;
use crate::credentials::{self, Credentials, Netrc};
use crate::ndsi::NdsiSource;
use crate::snodas::SnodasSource;
use crate::{SnowSource, SourceError};

/// Creates the adapter for `id` from `config`.
///
/// NDSI picks up credentials for its credential machine from the netrc
/// file when one exists; a missing file means anonymous requests.
///
/// # Errors
///
/// Returns [`SourceError`] if the HTTP client cannot be built or an
/// existing netrc cannot be read.
pub fn source_for(id: SourceId, config: &PipelineConfig) -> Result<Box<dyn SnowSource>, SourceError> {
    let layout = config.layout();

    Ok(match id {
        SourceId::Ndsi => Box::new(NdsiSource::new(
            layout,
            config.ndsi.clone(),
            &config.http,
            ndsi_credentials(config)?,
        )?),
        SourceId::Snodas => Box::new(SnodasSource::new(
            layout,
            config.snodas.clone(),
            &config.http,
        )?),
    })
}

/// Creates every adapter in [`SourceId::ALL`] order.
///
/// # Errors
///
/// See [`source_for`].
pub fn all_sources(config: &PipelineConfig) -> Result<Vec<Box<dyn SnowSource>>, SourceError> {
    SourceId::ALL
        .iter()
        .map(|id| source_for(*id, config))
        .collect()
}

/// The netrc path NDSI reads: the configured one, else `$HOME/.netrc`.
#[must_use]
pub fn netrc_path(config: &PipelineConfig) -> Option<std::path::PathBuf> {
    config
        .ndsi
        .netrc_path
        .clone()
        .or_else(credentials::default_netrc_path)
}

fn ndsi_credentials(config: &PipelineConfig) -> Result<Option<Credentials>, SourceError> {
    let Some(path) = netrc_path(config) else {
        return Ok(None);
    };
    if !path.exists() {
        log::debug!("No netrc at {}; NDSI requests are anonymous", path.display());
        return Ok(None);
    }

    let creds = Netrc::load(&path)?
        .credentials_for(&config.ndsi.credential_machine)
        .cloned();
    if creds.is_none() {
        log::warn!(
            "{} has no entry for {}",
            path.display(),
            config.ndsi.credential_machine
        );
    }

    Ok(creds)
}
