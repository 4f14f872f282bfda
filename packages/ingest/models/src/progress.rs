//! Progress reporting for batch runs.
//!
//! The engine reports through [`ProgressCallback`] without knowing how
//! progress is rendered; `indicatif` bars live in the CLI utilities crate.

use std::sync::Arc;

/// Receives progress updates from a running batch.
pub trait ProgressCallback: Send + Sync {
    /// Set the total number of rows.
    fn set_total(&self, total: u64);

    /// Advance by `delta` rows.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
