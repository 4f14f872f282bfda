//! Batch driver.
//!
//! Rows are reconciled one at a time inside a single transaction. Each row
//! runs under its own savepoint so a skipped or failed row undoes only its
//! own writes. Commit-mode batches can commit every `commit_every` rows;
//! dry runs never commit and roll everything back at the end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use city_inventory_database::{Checkpoint, InventoryStore};
use city_inventory_ingest_models::{
    BatchCounters, BatchReport, BatchRequest, CancelDecision, FixedDecision, InputRow,
    InterruptPolicy, RowOutcome, RowReport, RowStatus,
    mapping::validate_properties,
    progress::{ProgressCallback, null_progress},
};
use city_inventory_models::ServiceTypeDescriptor;

use crate::{
    IngestError,
    address::AddressPrefixes,
    reconcile::{RowContext, reconcile_row},
};

/// Savepoint name used for every row.
const ROW_SAVEPOINT: &str = "ingest_row";

/// Progress reporting and interruption handling for a batch.
#[derive(Clone)]
pub struct BatchControls {
    /// Receives one increment per row.
    pub progress: Arc<dyn ProgressCallback>,
    /// Checked between rows; once set, remaining rows are cancelled.
    pub interrupt: Arc<AtomicBool>,
    /// Decides what happens to uncommitted rows after an interruption.
    pub policy: Arc<dyn InterruptPolicy>,
}

impl Default for BatchControls {
    fn default() -> Self {
        Self {
            progress: null_progress(),
            interrupt: Arc::new(AtomicBool::new(false)),
            policy: Arc::new(FixedDecision(CancelDecision::Rollback)),
        }
    }
}

impl BatchControls {
    /// Silent progress, a fresh interrupt flag and a rollback policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the interrupt flag.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Replaces the interrupt policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn InterruptPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

/// Resolves the service type, which must match exactly one record.
async fn resolve_service_type<S: InventoryStore + ?Sized>(
    store: &S,
    name_or_code: &str,
) -> Result<ServiceTypeDescriptor, IngestError> {
    let mut found = store.find_service_types(name_or_code).await?;
    match found.len() {
        0 => Err(IngestError::UnknownServiceType {
            name: name_or_code.to_string(),
        }),
        1 => Ok(found.remove(0)),
        count => Err(IngestError::AmbiguousServiceType {
            name: name_or_code.to_string(),
            count,
        }),
    }
}

/// Runs one row under a checkpoint.
///
/// Successful rows release the checkpoint; skipped and failed rows roll
/// back to it. A failing checkpoint statement becomes the row's error, and
/// a row whose release fails is rolled back as well.
async fn process_row<S: InventoryStore + ?Sized>(
    store: &mut S,
    ctx: &RowContext<'_>,
    row: &InputRow,
) -> RowOutcome {
    let checkpoint = match Checkpoint::acquire(store, ROW_SAVEPOINT).await {
        Ok(checkpoint) => checkpoint,
        Err(e) => {
            return RowOutcome::skipped(
                RowStatus::SkippedError,
                format!("Failed to create savepoint: {e}"),
            );
        }
    };

    match reconcile_row(store, ctx, row).await {
        Ok(outcome) => {
            let name = checkpoint.name().to_string();
            match checkpoint.release(store).await {
                Ok(()) => outcome,
                Err(e) => {
                    let mut message = format!("Failed to release savepoint: {e}");
                    if let Err(e) = store.rollback_to_savepoint(&name).await {
                        message = format!("{message}; failed to roll back to savepoint: {e}");
                    }
                    RowOutcome::skipped(RowStatus::SkippedError, message)
                }
            }
        }
        Err(failure) => {
            let mut outcome = failure.into_outcome();
            if let Err(e) = checkpoint.rollback(store).await {
                outcome.status = RowStatus::SkippedError;
                outcome.message = format!(
                    "{}; failed to roll back to savepoint: {e}",
                    outcome.message
                );
            }
            outcome
        }
    }
}

fn log_outcome(index: usize, outcome: &RowOutcome) {
    match outcome.status {
        RowStatus::SkippedError => log::error!("Row {index}: {}", outcome.message),
        status if status.is_skip() => {
            log::debug!("Row {index} skipped ({status}): {}", outcome.message);
        }
        status => log::trace!("Row {index}: {status}"),
    }
}

/// Reconciles a batch of rows and reports the outcome of each.
///
/// Setup (mapping validation, city and service type resolution, opening
/// the transaction) happens before any row is processed; failures there
/// abort the batch. Row failures never abort it.
///
/// # Errors
///
/// Returns [`IngestError`] on setup failures and when a commit fails.
pub async fn process_batch<S: InventoryStore + ?Sized>(
    store: &mut S,
    request: &BatchRequest,
    rows: &[InputRow],
    controls: &BatchControls,
) -> Result<BatchReport, IngestError> {
    let start = Instant::now();

    let mapping = request.mapping.clone().normalized();
    mapping.validate()?;
    validate_properties(&request.properties)?;

    let city = store
        .find_city(&request.city)
        .await?
        .ok_or_else(|| IngestError::UnknownCity {
            name: request.city.clone(),
        })?;
    let service_type = resolve_service_type(&*store, &request.service_type).await?;
    let prefixes = AddressPrefixes::new(&request.address_prefixes);

    store.begin().await.map_err(IngestError::Transaction)?;

    log::info!(
        "Ingesting {} row(s) of {:?} into {} ({}){}",
        rows.len(),
        service_type.name,
        city.name,
        city.id,
        if request.mode.is_dry_run() {
            " [dry run]"
        } else {
            ""
        }
    );

    let total = rows.len();
    controls.progress.set_total(total as u64);
    controls
        .progress
        .set_message(format!("{} ({})", service_type.name, city.name));

    let mut reports = Vec::with_capacity(total);
    let mut counters = BatchCounters::default();
    let mut commits = 0usize;
    let mut interrupted = false;

    for (index, row) in rows.iter().enumerate() {
        if controls.interrupt.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }

        let ctx = RowContext {
            city_id: city.id,
            service_type: &service_type,
            mapping: &mapping,
            properties: &request.properties,
            prefixes: &prefixes,
            new_prefix: &request.new_prefix,
            now: chrono::Utc::now().naive_utc(),
        };

        let outcome = process_row(store, &ctx, row).await;
        log_outcome(index, &outcome);
        counters.record(outcome.status);
        reports.push(RowReport { index, outcome });
        controls.progress.inc(1);

        let processed = index + 1;
        if request.log_every > 0 && processed % request.log_every == 0 {
            log::info!("Processed {processed}/{total} rows: {counters}");
        }

        if !request.mode.is_dry_run()
            && processed < total
            && request
                .commit_every
                .is_some_and(|every| every > 0 && processed % every == 0)
        {
            store.commit().await.map_err(IngestError::Commit)?;
            commits += 1;
            log::info!("Committed after {processed} rows");
            store.begin().await.map_err(IngestError::Transaction)?;
        }
    }

    let mut decision = None;
    if interrupted {
        let done = reports.len();
        for index in done..total {
            let outcome = RowOutcome::skipped(RowStatus::SkippedCancelled, "batch interrupted");
            counters.record(outcome.status);
            reports.push(RowReport { index, outcome });
        }
        log::warn!(
            "Batch interrupted after {done} of {total} rows; {} row(s) cancelled",
            total - done
        );

        decision = Some(if request.mode.is_dry_run() {
            CancelDecision::Rollback
        } else {
            controls.policy.decide(&counters)
        });
    }

    let committed = if request.mode.is_dry_run() || decision == Some(CancelDecision::Rollback) {
        store.rollback().await.map_err(IngestError::Transaction)?;
        log::info!("Rolled back uncommitted changes");
        false
    } else {
        store.commit().await.map_err(IngestError::Commit)?;
        commits += 1;
        true
    };

    let summary = counters.to_string();
    controls.progress.finish(summary.clone());
    log::info!(
        "Finished {} in {:.1}s: {summary}",
        service_type.name,
        start.elapsed().as_secs_f64()
    );

    Ok(BatchReport {
        city_id: city.id,
        service_type_id: service_type.id,
        mode: request.mode,
        rows: reports,
        counters,
        commits,
        committed,
        interrupted: decision,
        duration: start.elapsed(),
    })
}
