//! Batch parameters and interruption handling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{BatchCounters, InputMapping, PropertyBinding};

/// Default number of rows between progress log lines.
pub const DEFAULT_LOG_EVERY: usize = 200;

/// Whether a batch persists its writes.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunMode {
    /// Commit the transaction (periodically and at the end).
    #[default]
    Commit,
    /// Classify every row as a committed run would, then roll back.
    DryRun,
}

impl RunMode {
    /// Returns `true` for [`RunMode::DryRun`].
    #[must_use]
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Self::DryRun)
    }
}

/// What to do with uncommitted progress when a batch is interrupted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CancelDecision {
    /// Commit the rows processed since the last commit.
    Commit,
    /// Discard the rows processed since the last commit.
    Rollback,
}

/// Chooses between committing and rolling back on interruption.
pub trait InterruptPolicy: Send + Sync {
    /// Called once, after the remaining rows have been marked cancelled.
    fn decide(&self, counters: &BatchCounters) -> CancelDecision;
}

/// An [`InterruptPolicy`] that always returns the same decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDecision(pub CancelDecision);

impl InterruptPolicy for FixedDecision {
    fn decide(&self, _counters: &BatchCounters) -> CancelDecision {
        self.0
    }
}

/// Everything needed to reconcile a batch of rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// City name or code.
    pub city: String,
    /// Service type name or code.
    pub service_type: String,
    /// Role bindings.
    pub mapping: InputMapping,
    /// Extra `properties` keys filled from source columns.
    pub properties: BTreeMap<String, PropertyBinding>,
    /// Literal prefixes stripped from addresses.
    pub address_prefixes: Vec<String>,
    /// Prefix prepended to the address suffix of new buildings.
    pub new_prefix: String,
    /// Commit or dry run.
    pub mode: RunMode,
    /// Commit every this many rows; `None` commits only at the end.
    pub commit_every: Option<usize>,
    /// Log progress every this many rows.
    pub log_every: usize,
}

impl BatchRequest {
    /// A commit-mode request with no property bindings, no prefixes and
    /// default logging.
    #[must_use]
    pub fn new(
        city: impl Into<String>,
        service_type: impl Into<String>,
        mapping: InputMapping,
    ) -> Self {
        Self {
            city: city.into(),
            service_type: service_type.into(),
            mapping,
            properties: BTreeMap::new(),
            address_prefixes: Vec::new(),
            new_prefix: String::new(),
            mode: RunMode::Commit,
            commit_every: None,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_decision_ignores_counters() {
        let policy = FixedDecision(CancelDecision::Rollback);
        assert_eq!(
            policy.decide(&BatchCounters::default()),
            CancelDecision::Rollback
        );
    }

    #[test]
    fn run_modes_parse_from_kebab_case() {
        assert_eq!("dry-run".parse::<RunMode>().unwrap(), RunMode::DryRun);
        assert!(RunMode::DryRun.is_dry_run());
        assert!(!RunMode::default().is_dry_run());
    }
}
