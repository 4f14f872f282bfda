#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for binaries that run ingest batches.
//!
//! Provides an `indicatif` progress bar behind the engine's
//! [`ProgressCallback`] trait, [`init_logger`] which routes `log` output
//! through `indicatif-log-bridge` so log lines don't tear the bars, a
//! Ctrl-C backed interrupt flag, and an interactive commit/rollback prompt
//! for interrupted batches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use city_inventory_ingest_models::{
    BatchCounters, CancelDecision, InterruptPolicy, progress::ProgressCallback,
};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `set_total()` provides a known length.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates a row progress bar.
    ///
    /// Starts as a spinner and becomes a bar with percentage and ETA once
    /// [`ProgressCallback::set_total()`] is called.
    #[must_use]
    pub fn rows_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::spinner(multi, message))
    }

    fn spinner(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} rows {percent}% [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self { bar, bar_style }
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

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    multi
}

/// Returns a flag that is raised on the first Ctrl-C.
///
/// Must be called from within a Tokio runtime. The batch driver checks the
/// flag between rows.
#[must_use]
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let listener = flag.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("Interrupt received, stopping after the current row");
                listener.store(true, Ordering::SeqCst);
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    flag
}

/// Asks on the terminal whether to keep progress after an interruption.
///
/// Falls back to rolling back when the prompt cannot be shown.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInterruptPolicy;

impl PromptInterruptPolicy {
    fn prompt(counters: &BatchCounters) -> String {
        format!("Batch interrupted ({counters}). Keep progress since last commit?")
    }
}

impl InterruptPolicy for PromptInterruptPolicy {
    fn decide(&self, counters: &BatchCounters) -> CancelDecision {
        match Confirm::new()
            .with_prompt(Self::prompt(counters))
            .default(false)
            .interact()
        {
            Ok(true) => CancelDecision::Commit,
            Ok(false) => CancelDecision::Rollback,
            Err(e) => {
                log::error!("Interrupt prompt failed, rolling back: {e}");
                CancelDecision::Rollback
            }
        }
    }
}
