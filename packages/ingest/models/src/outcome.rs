//! Per-row outcomes and batch counters.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How a row ended.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RowStatus {
    /// A new physical object (and building) was created for the service.
    InsertedNew,
    /// The service was attached to a building found by address.
    InsertedByAddressMatch,
    /// The service was attached to an object found by geometry.
    InsertedByGeometryMatch,
    /// An existing service was updated or touched.
    UpdatedExisting,
    /// The geometry was rejected.
    SkippedInvalidGeometry,
    /// Coordinates could not be parsed.
    SkippedInvalidCoordinates,
    /// Neither geometry nor coordinates were present.
    SkippedMissingFields,
    /// The address matched no configured prefix.
    SkippedInvalidAddress,
    /// A backend error occurred while processing the row.
    SkippedError,
    /// The batch was interrupted before the row was processed.
    SkippedCancelled,
}

impl RowStatus {
    /// Returns `true` for the three insert outcomes.
    #[must_use]
    pub const fn is_insert(self) -> bool {
        matches!(
            self,
            Self::InsertedNew | Self::InsertedByAddressMatch | Self::InsertedByGeometryMatch
        )
    }

    /// Returns `true` for every skip outcome, cancellation included.
    #[must_use]
    pub const fn is_skip(self) -> bool {
        !self.is_insert() && !matches!(self, Self::UpdatedExisting)
    }
}

/// Result of reconciling one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    /// How the row ended.
    pub status: RowStatus,
    /// Inserted or updated functional object.
    pub functional_object_id: Option<i64>,
    /// Physical object the service lives on.
    pub physical_object_id: Option<i64>,
    /// Building wrapping the physical object.
    pub building_id: Option<i64>,
    /// Fields changed by an update; empty when the service was only
    /// touched.
    pub changed_fields: Vec<String>,
    /// Human-readable explanation.
    pub message: String,
}

impl RowOutcome {
    /// A skip outcome.
    #[must_use]
    pub fn skipped(status: RowStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            functional_object_id: None,
            physical_object_id: None,
            building_id: None,
            changed_fields: Vec::new(),
            message: message.into(),
        }
    }

    /// An insert outcome.
    #[must_use]
    pub fn inserted(
        status: RowStatus,
        functional_object_id: i64,
        physical_object_id: i64,
        building_id: Option<i64>,
    ) -> Self {
        Self {
            status,
            functional_object_id: Some(functional_object_id),
            physical_object_id: Some(physical_object_id),
            building_id,
            changed_fields: Vec::new(),
            message: format!("{status} (functional object {functional_object_id})"),
        }
    }

    /// An update outcome.
    #[must_use]
    pub fn updated(
        functional_object_id: i64,
        physical_object_id: i64,
        building_id: Option<i64>,
        changed_fields: Vec<String>,
    ) -> Self {
        let message = if changed_fields.is_empty() {
            format!("functional object {functional_object_id} touched")
        } else {
            format!(
                "functional object {functional_object_id} updated: {}",
                changed_fields.join(", ")
            )
        };
        Self {
            status: RowStatus::UpdatedExisting,
            functional_object_id: Some(functional_object_id),
            physical_object_id: Some(physical_object_id),
            building_id,
            changed_fields,
            message,
        }
    }
}

/// Running totals over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Services attached to buildings found by address.
    pub inserted_by_address: u64,
    /// Services attached to objects found by geometry.
    pub inserted_by_geometry: u64,
    /// Services on newly created objects.
    pub inserted_new: u64,
    /// Services updated or touched.
    pub updated: u64,
    /// Rows skipped for any reason other than cancellation.
    pub skipped: u64,
    /// Rows not processed because the batch was interrupted.
    pub cancelled: u64,
}

impl BatchCounters {
    /// Counts one row.
    pub const fn record(&mut self, status: RowStatus) {
        match status {
            RowStatus::InsertedByAddressMatch => self.inserted_by_address += 1,
            RowStatus::InsertedByGeometryMatch => self.inserted_by_geometry += 1,
            RowStatus::InsertedNew => self.inserted_new += 1,
            RowStatus::UpdatedExisting => self.updated += 1,
            RowStatus::SkippedCancelled => self.cancelled += 1,
            RowStatus::SkippedInvalidGeometry
            | RowStatus::SkippedInvalidCoordinates
            | RowStatus::SkippedMissingFields
            | RowStatus::SkippedInvalidAddress
            | RowStatus::SkippedError => self.skipped += 1,
        }
    }

    /// Services inserted, all kinds together.
    #[must_use]
    pub const fn inserted(&self) -> u64 {
        self.inserted_by_address + self.inserted_by_geometry + self.inserted_new
    }

    /// Rows counted so far.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.inserted() + self.updated + self.skipped + self.cancelled
    }
}

impl std::fmt::Display for BatchCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inserted ({} by address, {} by geometry, {} new), {} updated, {} skipped, {} cancelled",
            self.inserted(),
            self.inserted_by_address,
            self.inserted_by_geometry,
            self.inserted_new,
            self.updated,
            self.skipped,
            self.cancelled
        )
    }
}
