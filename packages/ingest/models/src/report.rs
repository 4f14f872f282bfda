//! Batch results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BatchCounters, CancelDecision, RowOutcome, RunMode};

/// Outcome of one row, tagged with its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReport {
    /// Zero-based row index.
    pub index: usize,
    /// What happened to the row.
    pub outcome: RowOutcome,
}

/// Result of a completed (or interrupted) batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Resolved city id.
    pub city_id: i64,
    /// Resolved service type id.
    pub service_type_id: i64,
    /// Commit or dry run.
    pub mode: RunMode,
    /// One entry per input row, in input order.
    pub rows: Vec<RowReport>,
    /// Totals over `rows`.
    pub counters: BatchCounters,
    /// Number of commits issued.
    pub commits: usize,
    /// Whether the final transaction was committed.
    pub committed: bool,
    /// Set when the batch was interrupted; records the policy's choice.
    pub interrupted: Option<CancelDecision>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl BatchReport {
    /// Writes one CSV line per row: index, status, ids, changed fields and
    /// message.
    ///
    /// # Errors
    ///
    /// Returns [`csv::Error`] if writing fails.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([
            "index",
            "status",
            "functional_object_id",
            "physical_object_id",
            "building_id",
            "changed_fields",
            "message",
        ])?;

        let id = |value: Option<i64>| value.map_or_else(String::new, |v| v.to_string());
        for row in &self.rows {
            let outcome = &row.outcome;
            csv.write_record([
                row.index.to_string(),
                outcome.status.to_string(),
                id(outcome.functional_object_id),
                id(outcome.physical_object_id),
                id(outcome.building_id),
                outcome.changed_fields.join(";"),
                outcome.message.clone(),
            ])?;
        }

        csv.flush()?;
        Ok(())
    }
}
