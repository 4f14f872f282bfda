#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Inventory store for service ingestion.
//!
//! [`store::InventoryStore`] is the seam between the reconciliation engine
//! and the spatial-relational backend. Two implementations exist:
//!
//! - [`postgis::PostgisStore`] issues raw `PostGIS` SQL through
//!   `switchy_database` (`query_raw_params()`), one long-lived transaction
//!   at a time.
//! - [`memory::MemoryStore`] keeps the inventory in process, using
//!   `city_inventory_spatial` for geometry predicates and snapshots for
//!   savepoints.
//!
//! [`checkpoint::Checkpoint`] wraps savepoints as a handle that must be
//! released or rolled back.

pub mod checkpoint;
pub mod db;
pub mod memory;
pub mod postgis;
pub mod queries;
pub mod store;

pub use checkpoint::Checkpoint;
pub use db::ConnectionSettings;
pub use memory::{FailPoint, MemoryStore};
pub use postgis::PostgisStore;
pub use store::{GeometrySearch, InventoryStore, SearchShape};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The database could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// The spatial backend rejected a geometry.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry {
        /// Backend message.
        message: String,
    },

    /// A write violated a table constraint.
    #[error("Constraint violation: {message}")]
    Constraint {
        /// Which constraint and why.
        message: String,
    },

    /// A referenced row does not exist.
    #[error("{entity} with id={id} not found")]
    NotFound {
        /// Table or entity name.
        entity: &'static str,
        /// The missing id.
        id: i64,
    },

    /// Transaction control was used out of order.
    #[error("Transaction error: {message}")]
    Transaction {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    /// Returns `true` if the error means the submitted geometry was
    /// rejected, as opposed to a backend or data failure.
    #[must_use]
    pub const fn is_invalid_geometry(&self) -> bool {
        matches!(self, Self::InvalidGeometry { .. })
    }
}
