#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coercion of heterogeneous source values into typed, nullable SQL values.
//!
//! Source documents (spreadsheets, CSV exports, `GeoJSON` properties) carry
//! loosely typed cells: numbers stored as text, empty strings standing in
//! for missing data, localized booleans. Every coercion here swallows dirty
//! data into `None` so a single bad cell never aborts an ingestion batch.
//!
//! The one exception is [`SqlType::Timestamp`]: only a decomposed
//! date-time can become a timestamp, and anything else is a caller defect
//! reported as [`CoercionError::NotADateTime`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Output format of [`SqlType::Timestamp`] coercion.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Textual values that coerce to `false` (compared case-insensitively).
pub const BOOLEAN_NEGATIVES: &[&str] = &["-", "0", "false", "no", "off", "нет", "ложь"];

/// Errors raised by coercion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    /// A non-date-time value was passed to the timestamp coercion.
    #[error("Only a decomposed date-time can be cast to a SQL timestamp, got {found}")]
    NotADateTime {
        /// Short description of the offending value.
        found: String,
    },

    /// A type name did not match any known SQL type alias.
    #[error("Type {name} cannot be mapped to a SQL type")]
    UnknownType {
        /// The unrecognized type name.
        name: String,
    },
}

/// A raw value as produced by an external file loader.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Missing cell.
    Null,
    /// Text cell.
    Text(String),
    /// Integral number cell.
    Integer(i64),
    /// Floating point cell (may be `NaN` for empty spreadsheet cells).
    Float(f64),
    /// Boolean cell.
    Bool(bool),
    /// Structured value (nested `GeoJSON` properties, lists, …).
    Json(serde_json::Value),
    /// Decomposed calendar date and time.
    DateTime(NaiveDateTime),
}

impl RawValue {
    /// Returns `true` for missing values, `NaN` floats, JSON `null` and
    /// empty strings.
    #[must_use]
    pub fn is_null_like(&self) -> bool {
        match self {
            Self::Null | Self::Json(serde_json::Value::Null) => true,
            Self::Float(f) => f.is_nan(),
            Self::Text(s) => s.is_empty(),
            Self::Integer(_) | Self::Bool(_) | Self::Json(_) | Self::DateTime(_) => false,
        }
    }

    /// Short type label used in log and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Json(_) => "json",
            Self::DateTime(_) => "datetime",
        }
    }

    /// Converts the value into a JSON value for storage in a `jsonb`
    /// column. Null-like values become JSON `null`; date-times are
    /// rendered with [`TIMESTAMP_FORMAT`].
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        if self.is_null_like() {
            return serde_json::Value::Null;
        }
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Json(v) => v.clone(),
            Self::DateTime(dt) => serde_json::Value::String(dt.format(TIMESTAMP_FORMAT).to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for RawValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A normalized, typed value ready to be bound to a SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `integer`
    Integer(i64),
    /// `smallint`
    SmallInt(i16),
    /// `double precision`
    Double(f64),
    /// `boolean`
    Boolean(bool),
    /// `character varying`
    Varchar(String),
    /// `jsonb`, already serialized.
    Jsonb(String),
    /// `timestamp with time zone`, formatted with [`TIMESTAMP_FORMAT`].
    Timestamp(String),
}

impl SqlValue {
    /// Converts the value into the JSON stored in a `properties` map.
    /// Serialized `jsonb` text is parsed back into structure.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::SmallInt(i) => serde_json::Value::from(*i),
            Self::Double(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Varchar(s) | Self::Timestamp(s) => serde_json::Value::String(s.clone()),
            Self::Jsonb(text) => serde_json::from_str(text)
                .unwrap_or_else(|_| serde_json::Value::String(text.clone())),
        }
    }
}

/// SQL column types a source value can be coerced into.
///
/// Parsing accepts the aliases users type into mapping configurations
/// (`"int"`, `"text"`, `"дата"`, …); display gives the `PostgreSQL` name.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(try_from = "String", into = "String")]
#[strum(ascii_case_insensitive)]
pub enum SqlType {
    /// Whole numbers.
    #[strum(
        to_string = "integer",
        serialize = "int",
        serialize = "number",
        serialize = "целое"
    )]
    Int,
    /// Small whole numbers.
    #[strum(to_string = "smallint", serialize = "малое", serialize = "малое целое")]
    SmallInt,
    /// Floating point numbers.
    #[strum(
        to_string = "double precision",
        serialize = "float",
        serialize = "double",
        serialize = "вещественное",
        serialize = "нецелое"
    )]
    Double,
    /// Booleans with localized negatives.
    #[strum(to_string = "boolean", serialize = "bool", serialize = "булево")]
    Boolean,
    /// Free text.
    #[strum(
        to_string = "character varying",
        serialize = "varchar",
        serialize = "str",
        serialize = "string",
        serialize = "text",
        serialize = "строка"
    )]
    Varchar,
    /// Structured values.
    #[strum(to_string = "jsonb", serialize = "json")]
    Jsonb,
    /// Date-times.
    #[strum(
        to_string = "timestamp with time zone",
        serialize = "timestamp",
        serialize = "date",
        serialize = "time",
        serialize = "datetime",
        serialize = "дата",
        serialize = "время"
    )]
    Timestamp,
}

impl SqlType {
    /// Looks a type up by any of its aliases. `character varying(n)` is
    /// accepted for any length.
    ///
    /// # Errors
    ///
    /// Returns [`CoercionError::UnknownType`] if the name is not a known
    /// alias.
    pub fn from_name(name: &str) -> Result<Self, CoercionError> {
        let trimmed = name.trim();
        if let Ok(sql_type) = trimmed.parse::<Self>() {
            return Ok(sql_type);
        }
        if trimmed.to_lowercase().starts_with("character varying") {
            return Ok(Self::Varchar);
        }
        Err(CoercionError::UnknownType {
            name: name.to_string(),
        })
    }

    /// The `PostgreSQL` name of this type.
    #[must_use]
    pub fn sql_name(self) -> String {
        self.to_string()
    }

    /// Coerces `value` into this type.
    ///
    /// Null-like input yields `Ok(None)`. Unparseable input yields
    /// `Ok(None)` for every type except [`SqlType::Timestamp`].
    ///
    /// # Errors
    ///
    /// Returns [`CoercionError::NotADateTime`] when a non-null value that is
    /// not a decomposed date-time is cast to [`SqlType::Timestamp`].
    pub fn cast(self, value: &RawValue) -> Result<Option<SqlValue>, CoercionError> {
        let cast = match self {
            Self::Int => coerce_int(value).map(SqlValue::Integer),
            Self::SmallInt => coerce_int(value)
                .and_then(|i| i16::try_from(i).ok())
                .map(SqlValue::SmallInt),
            Self::Double => coerce_double(value).map(SqlValue::Double),
            Self::Boolean => coerce_bool(value).map(SqlValue::Boolean),
            Self::Varchar => coerce_text(value).map(SqlValue::Varchar),
            Self::Jsonb => coerce_json_text(value).map(SqlValue::Jsonb),
            Self::Timestamp => coerce_timestamp(value)?.map(SqlValue::Timestamp),
        };

        if cast.is_none() && !value.is_null_like() {
            log::trace!("Could not cast {} value {value:?} to {self}", value.kind());
        }

        Ok(cast)
    }
}

impl TryFrom<String> for SqlType {
    type Error = CoercionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

impl From<SqlType> for String {
    fn from(value: SqlType) -> Self {
        value.sql_name()
    }
}

/// Parses text the way a lenient float parser would: surrounding
/// whitespace is ignored and non-finite results are rejected.
fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Coerces to a whole number by parsing as a float and truncating.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn coerce_int(value: &RawValue) -> Option<i64> {
    if value.is_null_like() {
        return None;
    }
    let float = match value {
        RawValue::Integer(i) => return Some(*i),
        RawValue::Bool(b) => return Some(i64::from(*b)),
        RawValue::Float(f) => Some(*f).filter(|f| f.is_finite()),
        RawValue::Text(s) => parse_finite(s),
        RawValue::Json(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                return Some(i);
            }
            n.as_f64()
        }
        RawValue::Json(serde_json::Value::String(s)) => parse_finite(s),
        RawValue::Null | RawValue::Json(_) | RawValue::DateTime(_) => None,
    }?;

    let truncated = float.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}

/// Coerces to a finite float.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coerce_double(value: &RawValue) -> Option<f64> {
    if value.is_null_like() {
        return None;
    }
    match value {
        RawValue::Integer(i) => Some(*i as f64),
        RawValue::Bool(b) => Some(f64::from(u8::from(*b))),
        RawValue::Float(f) => Some(*f).filter(|f| f.is_finite()),
        RawValue::Text(s) | RawValue::Json(serde_json::Value::String(s)) => parse_finite(s),
        RawValue::Json(serde_json::Value::Number(n)) => n.as_f64(),
        RawValue::Null | RawValue::Json(_) | RawValue::DateTime(_) => None,
    }
}

/// Coerces to a boolean. Text in [`BOOLEAN_NEGATIVES`] is `false`, any
/// other text is `true`; other values use their truthiness.
#[must_use]
pub fn coerce_bool(value: &RawValue) -> Option<bool> {
    if value.is_null_like() {
        return None;
    }
    Some(match value {
        RawValue::Text(s) => !is_negative_text(s),
        RawValue::Integer(i) => *i != 0,
        RawValue::Float(f) => *f != 0.0,
        RawValue::Bool(b) => *b,
        RawValue::Json(v) => json_truthiness(v),
        RawValue::Null => false,
        RawValue::DateTime(_) => true,
    })
}

fn is_negative_text(s: &str) -> bool {
    let lower = s.to_lowercase();
    BOOLEAN_NEGATIVES.contains(&lower.as_str())
}

fn json_truthiness(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !is_negative_text(s),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a scalar as text. Integral floats lose their fractional part so
/// phone numbers and codes read from spreadsheets stay readable.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn coerce_text(value: &RawValue) -> Option<String> {
    if value.is_null_like() {
        return None;
    }
    match value {
        RawValue::Text(s) | RawValue::Json(serde_json::Value::String(s)) => Some(s.clone()),
        RawValue::Integer(i) => Some(i.to_string()),
        RawValue::Float(f) if !f.is_finite() => None,
        RawValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some((*f as i64).to_string()),
        RawValue::Float(f) => Some(f.to_string()),
        RawValue::Bool(b) => Some(b.to_string()),
        RawValue::Json(v) => Some(v.to_string()),
        RawValue::DateTime(dt) => Some(dt.format(TIMESTAMP_FORMAT).to_string()),
        RawValue::Null => None,
    }
}

/// Serializes a value to canonical JSON text.
#[must_use]
pub fn coerce_json_text(value: &RawValue) -> Option<String> {
    if value.is_null_like() {
        return None;
    }
    Some(value.to_json().to_string())
}

/// Formats a decomposed date-time as [`TIMESTAMP_FORMAT`].
///
/// # Errors
///
/// Returns [`CoercionError::NotADateTime`] for any non-null input that is
/// not a [`RawValue::DateTime`].
pub fn coerce_timestamp(value: &RawValue) -> Result<Option<String>, CoercionError> {
    if value.is_null_like() {
        return Ok(None);
    }
    match value {
        RawValue::DateTime(dt) => Ok(Some(dt.format(TIMESTAMP_FORMAT).to_string())),
        other => Err(CoercionError::NotADateTime {
            found: format!("{} value {other:?}", other.kind()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    #[test]
    fn null_like_values_coerce_to_none_for_every_type() {
        let nulls = [
            RawValue::Null,
            RawValue::Float(f64::NAN),
            RawValue::Text(String::new()),
            RawValue::Json(serde_json::Value::Null),
        ];
        let types = [
            SqlType::Int,
            SqlType::SmallInt,
            SqlType::Double,
            SqlType::Boolean,
            SqlType::Varchar,
            SqlType::Jsonb,
            SqlType::Timestamp,
        ];
        for value in &nulls {
            for sql_type in types {
                assert_eq!(sql_type.cast(value).unwrap(), None, "{sql_type} {value:?}");
            }
        }
    }

    #[test]
    fn integers_truncate_parsed_floats() {
        assert_eq!(coerce_int(&"12.7".into()), Some(12));
        assert_eq!(coerce_int(&" 40 ".into()), Some(40));
        assert_eq!(coerce_int(&RawValue::Float(-3.9)), Some(-3));
        assert_eq!(coerce_int(&"forty".into()), None);
        assert_eq!(coerce_int(&RawValue::Float(f64::INFINITY)), None);
    }

    #[test]
    fn smallint_rejects_out_of_range_values() {
        assert_eq!(
            SqlType::SmallInt.cast(&"120".into()).unwrap(),
            Some(SqlValue::SmallInt(120))
        );
        assert_eq!(SqlType::SmallInt.cast(&"70000".into()).unwrap(), None);
    }

    #[test]
    fn doubles_parse_or_null() {
        assert_eq!(coerce_double(&"59.93".into()), Some(59.93));
        assert_eq!(coerce_double(&RawValue::Integer(3)), Some(3.0));
        assert_eq!(coerce_double(&"59,93".into()), None);
        assert_eq!(coerce_double(&"nan".into()), None);
    }

    #[test]
    fn textual_negatives_are_false() {
        for negative in ["-", "0", "false", "No", "OFF", "нет", "Ложь"] {
            assert_eq!(coerce_bool(&negative.into()), Some(false), "{negative}");
        }
        assert_eq!(coerce_bool(&"yes".into()), Some(true));
        assert_eq!(coerce_bool(&"anything".into()), Some(true));
    }

    #[test]
    fn non_text_booleans_use_truthiness() {
        assert_eq!(coerce_bool(&RawValue::Integer(0)), Some(false));
        assert_eq!(coerce_bool(&RawValue::Float(2.5)), Some(true));
        assert_eq!(coerce_bool(&RawValue::Json(serde_json::json!([]))), Some(false));
        assert_eq!(coerce_bool(&RawValue::Json(serde_json::json!({"a": 1}))), Some(true));
    }

    #[test]
    fn structured_values_serialize_to_json_text() {
        let value = RawValue::Json(serde_json::json!({"floors": 5}));
        assert_eq!(
            SqlType::Jsonb.cast(&value).unwrap(),
            Some(SqlValue::Jsonb("{\"floors\":5}".to_string()))
        );
        assert_eq!(coerce_json_text(&"abc".into()), Some("\"abc\"".to_string()));
    }

    #[test]
    fn jsonb_values_convert_back_to_structure() {
        let stored = SqlValue::Jsonb("{\"floors\":5}".to_string());
        assert_eq!(stored.to_json(), serde_json::json!({"floors": 5}));
        assert_eq!(SqlValue::SmallInt(3).to_json(), serde_json::json!(3));
    }

    #[test]
    fn integral_floats_render_without_fraction() {
        assert_eq!(
            coerce_text(&RawValue::Float(79_111_234_567.0)),
            Some("79111234567".to_string())
        );
        assert_eq!(coerce_text(&RawValue::Float(1.5)), Some("1.5".to_string()));
    }

    #[test]
    fn timestamps_format_decomposed_date_times() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(
            SqlType::Timestamp.cast(&dt.into()).unwrap(),
            Some(SqlValue::Timestamp("2024-03-07 09:05:01".to_string()))
        );
    }

    #[test]
    fn timestamps_reject_anything_else() {
        let err = SqlType::Timestamp.cast(&"2024-03-07".into()).unwrap_err();
        assert!(matches!(err, CoercionError::NotADateTime { .. }));
    }

    #[test]
    fn type_names_resolve_through_aliases() {
        assert_eq!(SqlType::from_name("INT").unwrap(), SqlType::Int);
        assert_eq!(SqlType::from_name("text").unwrap(), SqlType::Varchar);
        assert_eq!(
            SqlType::from_name("character varying(200)").unwrap(),
            SqlType::Varchar
        );
        assert_eq!(SqlType::from_name("дата").unwrap(), SqlType::Timestamp);
        assert!(SqlType::from_name("geometry").is_err());
        assert_eq!(SqlType::Double.sql_name(), "double precision");
    }
}
