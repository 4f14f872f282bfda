#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reconciliation of urban service records against the city inventory.
//!
//! Each input row is located, matched to an existing physical object by
//! address or geometry, and turned into an update of an existing service,
//! a new service on an existing object, or a new object with its service.
//! [`process_batch`] drives a whole batch inside one transaction with a
//! savepoint per row.

pub mod address;
pub mod batch;
pub mod fields;
pub mod insert;
pub mod location;
pub mod reconcile;
pub mod update;

use city_inventory_database::DbError;
use city_inventory_ingest_models::MappingError;

pub use batch::{BatchControls, process_batch};
pub use reconcile::{RowContext, RowFailure, reconcile_row};

/// Errors that abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Store failure during setup.
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// No city matches the requested name or code.
    #[error("Unknown city: {name}")]
    UnknownCity {
        /// Requested name or code.
        name: String,
    },

    /// No service type matches the requested name or code.
    #[error("Unknown service type: {name}")]
    UnknownServiceType {
        /// Requested name or code.
        name: String,
    },

    /// More than one service type matches the requested name or code.
    #[error("Service type {name:?} is ambiguous ({count} matches)")]
    AmbiguousServiceType {
        /// Requested name or code.
        name: String,
        /// Number of matching records.
        count: usize,
    },

    /// The input mapping is unusable.
    #[error("Invalid mapping: {0}")]
    Mapping(#[from] MappingError),

    /// A transaction could not be opened or rolled back.
    #[error("Transaction error: {0}")]
    Transaction(DbError),

    /// A commit failed; progress since the previous commit is lost.
    #[error("Commit failed: {0}")]
    Commit(DbError),
}
