//! Progress reporting for downloads and conversions.
//!
//! Sources and the converter report through [`ProgressCallback`] without
//! knowing how (or whether) progress is rendered. The CLI plugs in
//! `indicatif` bars; tests and library callers use [`null_progress`].

use std::sync::Arc;

/// Receives progress updates for one unit of pipeline work, e.g. the NDSI
/// link downloads for a date.
///
/// Shared across concurrent download tasks, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Number of files expected, once known.
    fn set_total(&self, total: u64);

    /// One or more files finished (successfully or not).
    fn inc(&self, delta: u64);

    /// Short status text, e.g. the file currently being fetched.
    fn set_message(&self, msg: String);

    /// The work is over; `msg` summarises the outcome.
    fn finish(&self, msg: String);
}

/// Discards all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
