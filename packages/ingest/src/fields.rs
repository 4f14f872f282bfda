//! Service attributes read from a row.

use std::collections::BTreeMap;

use city_inventory_coercion::{CoercionError, coerce_int, coerce_text};
use city_inventory_ingest_models::{InputMapping, InputRow, PropertyBinding};
use city_inventory_models::ServiceTypeDescriptor;

/// Name given to services whose row carries none.
#[must_use]
pub fn default_name(service_type: &ServiceTypeDescriptor) -> String {
    format!("({} without a name)", service_type.name)
}

/// The functional object attributes supplied by one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFields {
    /// Row name, or the service type's default name.
    pub name: String,
    /// Opening hours.
    pub opening_hours: Option<String>,
    /// Website.
    pub website: Option<String>,
    /// Phone.
    pub phone: Option<String>,
    /// Capacity, when present and integral.
    pub capacity: Option<i32>,
    /// The raw capacity text when present but not an integer.
    pub unparsed_capacity: Option<String>,
    /// External identifier of the physical object.
    pub external_id: Option<String>,
    /// Non-null mapped properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl ServiceFields {
    /// Reads and coerces the mapped fields of a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoercionError`] if a property declared as a timestamp
    /// holds something other than a date-time.
    pub fn from_row(
        row: &InputRow,
        mapping: &InputMapping,
        properties: &BTreeMap<String, PropertyBinding>,
        service_type: &ServiceTypeDescriptor,
    ) -> Result<Self, CoercionError> {
        let text = |column: &Option<String>| {
            row.field(column.as_deref())
                .and_then(coerce_text)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let capacity_value = row.field(mapping.capacity.as_deref());
        let capacity = capacity_value
            .and_then(coerce_int)
            .and_then(|c| i32::try_from(c).ok());
        let unparsed_capacity = match (capacity_value, capacity) {
            (Some(value), None) => Some(coerce_text(value).unwrap_or_else(|| format!("{value:?}"))),
            _ => None,
        };

        let mut mapped = serde_json::Map::new();
        for (key, binding) in properties {
            let Some(value) = row.get(&binding.column) else {
                continue;
            };
            if let Some(cast) = binding.sql_type.cast(value)? {
                mapped.insert(key.clone(), cast.to_json());
            }
        }

        Ok(Self {
            name: text(&mapping.name).unwrap_or_else(|| default_name(service_type)),
            opening_hours: text(&mapping.opening_hours),
            website: text(&mapping.website),
            phone: text(&mapping.phone),
            capacity,
            unparsed_capacity,
            external_id: text(&mapping.external_id),
            properties: mapped,
        })
    }
}

#[cfg(test)]
mod tests {
    use city_inventory_coercion::SqlType;

    use super::*;

    fn school() -> ServiceTypeDescriptor {
        ServiceTypeDescriptor {
            id: 1,
            name: "school".to_string(),
            code: None,
            function_id: 2,
            infrastructure_id: 3,
            is_building: true,
            capacity_min: 100,
            capacity_max: 900,
        }
    }

    fn mapping() -> InputMapping {
        InputMapping {
            name: Some("name".to_string()),
            phone: Some("phone".to_string()),
            capacity: Some("capacity".to_string()),
            ..InputMapping::default()
        }
    }

    #[test]
    fn missing_name_falls_back_to_type_name() {
        let row = InputRow::new().with("name", "   ");
        let fields =
            ServiceFields::from_row(&row, &mapping(), &BTreeMap::new(), &school()).unwrap();
        assert_eq!(fields.name, "(school without a name)");
    }

    #[test]
    fn capacity_is_truncated_or_reported_unparsed() {
        let row = InputRow::new().with("capacity", "350.7").with("phone", 79_111_234_567.0);
        let fields =
            ServiceFields::from_row(&row, &mapping(), &BTreeMap::new(), &school()).unwrap();
        assert_eq!(fields.capacity, Some(350));
        assert_eq!(fields.unparsed_capacity, None);
        assert_eq!(fields.phone.as_deref(), Some("79111234567"));

        let row = InputRow::new().with("capacity", "about forty");
        let fields =
            ServiceFields::from_row(&row, &mapping(), &BTreeMap::new(), &school()).unwrap();
        assert_eq!(fields.capacity, None);
        assert_eq!(fields.unparsed_capacity.as_deref(), Some("about forty"));
    }

    #[test]
    fn properties_are_coerced_and_nulls_dropped() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "floors".to_string(),
            PropertyBinding {
                column: "levels".to_string(),
                sql_type: SqlType::Int,
            },
        );
        properties.insert(
            "wheelchair".to_string(),
            PropertyBinding {
                column: "wheelchair".to_string(),
                sql_type: SqlType::Boolean,
            },
        );
        properties.insert(
            "note".to_string(),
            PropertyBinding {
                column: "note".to_string(),
                sql_type: SqlType::Varchar,
            },
        );

        let row = InputRow::new()
            .with("levels", "4")
            .with("wheelchair", "no")
            .with("note", "");
        let fields = ServiceFields::from_row(&row, &mapping(), &properties, &school()).unwrap();

        assert_eq!(fields.properties["floors"], serde_json::json!(4));
        assert_eq!(fields.properties["wheelchair"], serde_json::json!(false));
        assert!(!fields.properties.contains_key("note"));
    }

    #[test]
    fn timestamp_property_rejects_text() {
        let mut properties = BTreeMap::new();
        properties.insert(
            "opened".to_string(),
            PropertyBinding {
                column: "opened".to_string(),
                sql_type: SqlType::Timestamp,
            },
        );
        let row = InputRow::new().with("opened", "yesterday");
        assert!(ServiceFields::from_row(&row, &mapping(), &properties, &school()).is_err());
    }
}
