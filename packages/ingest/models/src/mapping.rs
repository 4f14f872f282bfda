//! Binding of semantic roles to source columns.

use std::collections::BTreeMap;

use city_inventory_coercion::SqlType;
use serde::{Deserialize, Deserializer, Serialize};

/// Errors found while validating an [`InputMapping`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// Neither a geometry column nor both coordinate columns are bound.
    #[error("Mapping binds neither a geometry column nor both latitude and longitude")]
    MissingLocation,

    /// A property binding has no source column.
    #[error("Property {key:?} is not bound to a source column")]
    EmptyPropertyColumn {
        /// Property key.
        key: String,
    },
}

/// Normalizes a column binding: empty strings and `"-"` mean unbound.
fn bind(column: Option<String>) -> Option<String> {
    column.filter(|c| !c.trim().is_empty() && c.trim() != "-")
}

fn deserialize_binding<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(bind(Option::<String>::deserialize(deserializer)?))
}

/// Source column bound to each semantic role.
///
/// Use [`InputMapping::normalized`] after building one by hand;
/// deserialization normalizes automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputMapping {
    /// Service name.
    #[serde(deserialize_with = "deserialize_binding")]
    pub name: Option<String>,
    /// Opening hours text.
    #[serde(deserialize_with = "deserialize_binding")]
    pub opening_hours: Option<String>,
    /// Website.
    #[serde(deserialize_with = "deserialize_binding")]
    pub website: Option<String>,
    /// Phone number.
    #[serde(deserialize_with = "deserialize_binding")]
    pub phone: Option<String>,
    /// Postal address.
    #[serde(deserialize_with = "deserialize_binding")]
    pub address: Option<String>,
    /// Capacity.
    #[serde(deserialize_with = "deserialize_binding")]
    pub capacity: Option<String>,
    /// External (e.g. OSM) identifier.
    #[serde(deserialize_with = "deserialize_binding")]
    pub external_id: Option<String>,
    /// Latitude.
    #[serde(deserialize_with = "deserialize_binding")]
    pub latitude: Option<String>,
    /// Longitude.
    #[serde(deserialize_with = "deserialize_binding")]
    pub longitude: Option<String>,
    /// `GeoJSON` geometry.
    #[serde(deserialize_with = "deserialize_binding")]
    pub geometry: Option<String>,
}

impl InputMapping {
    /// Returns the mapping with empty and `"-"` bindings turned into
    /// `None`.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            name: bind(self.name),
            opening_hours: bind(self.opening_hours),
            website: bind(self.website),
            phone: bind(self.phone),
            address: bind(self.address),
            capacity: bind(self.capacity),
            external_id: bind(self.external_id),
            latitude: bind(self.latitude),
            longitude: bind(self.longitude),
            geometry: bind(self.geometry),
        }
    }

    /// Checks that a location can be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::MissingLocation`] unless the geometry or both
    /// coordinates are bound.
    pub const fn validate(&self) -> Result<(), MappingError> {
        if self.geometry.is_none() && (self.latitude.is_none() || self.longitude.is_none()) {
            return Err(MappingError::MissingLocation);
        }
        Ok(())
    }
}

/// A `properties` key filled from a source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBinding {
    /// Source column.
    pub column: String,
    /// Declared type the value is coerced to.
    #[serde(rename = "type")]
    pub sql_type: SqlType,
}

/// Checks that every property binding names a column.
///
/// # Errors
///
/// Returns [`MappingError::EmptyPropertyColumn`] for the first binding with
/// an empty column.
pub fn validate_properties(
    properties: &BTreeMap<String, PropertyBinding>,
) -> Result<(), MappingError> {
    match properties
        .iter()
        .find(|(_, binding)| bind(Some(binding.column.clone())).is_none())
    {
        Some((key, _)) => Err(MappingError::EmptyPropertyColumn { key: key.clone() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_dash_bindings_are_unbound() {
        let mapping = InputMapping {
            name: Some("title".to_string()),
            phone: Some("-".to_string()),
            website: Some(String::new()),
            ..InputMapping::default()
        }
        .normalized();

        assert_eq!(mapping.name.as_deref(), Some("title"));
        assert_eq!(mapping.phone, None);
        assert_eq!(mapping.website, None);
    }

    #[test]
    fn location_requires_geometry_or_both_coordinates() {
        let mut mapping = InputMapping {
            latitude: Some("lat".to_string()),
            ..InputMapping::default()
        };
        assert_eq!(mapping.validate(), Err(MappingError::MissingLocation));

        mapping.longitude = Some("lon".to_string());
        assert_eq!(mapping.validate(), Ok(()));

        let geometry_only = InputMapping {
            geometry: Some("geometry".to_string()),
            ..InputMapping::default()
        };
        assert_eq!(geometry_only.validate(), Ok(()));
    }

    #[test]
    fn deserialization_normalizes_bindings() {
        let mapping: InputMapping =
            serde_json::from_str(r#"{"name": "title", "phone": "-", "geometry": "geom"}"#)
                .unwrap();
        assert_eq!(mapping.phone, None);
        assert_eq!(mapping.geometry.as_deref(), Some("geom"));
        assert_eq!(mapping.address, None);
    }

    #[test]
    fn property_bindings_need_a_column() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "floors".to_string(),
            PropertyBinding {
                column: "-".to_string(),
                sql_type: SqlType::Int,
            },
        );
        assert_eq!(
            validate_properties(&properties),
            Err(MappingError::EmptyPropertyColumn {
                key: "floors".to_string()
            })
        );
    }
}
