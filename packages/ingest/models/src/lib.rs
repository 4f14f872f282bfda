#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion input, configuration, progress and result types.

pub mod mapping;
pub mod outcome;
pub mod profile;
pub mod progress;
pub mod report;
pub mod request;

use std::collections::BTreeMap;

use city_inventory_coercion::RawValue;

pub use mapping::{InputMapping, MappingError, PropertyBinding};
pub use outcome::{BatchCounters, RowOutcome, RowStatus};
pub use profile::{BatchProfile, ProfileError};
pub use report::{BatchReport, RowReport};
pub use request::{BatchRequest, CancelDecision, FixedDecision, InterruptPolicy, RunMode};

/// One source record: raw values keyed by source column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRow {
    values: BTreeMap<String, RawValue>,
}

impl InputRow {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Sets a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<RawValue>) {
        self.values.insert(column.into(), value.into());
    }

    /// The raw value of a column, if the column exists.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.values.get(column)
    }

    /// The value bound to a mapping role.
    ///
    /// Unbound roles, missing columns and null-like values all read as
    /// `None`.
    #[must_use]
    pub fn field(&self, column: Option<&str>) -> Option<&RawValue> {
        column
            .and_then(|c| self.values.get(c))
            .filter(|v| !v.is_null_like())
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for InputRow {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
