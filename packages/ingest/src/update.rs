//! Change detection for existing services.

use chrono::NaiveDateTime;
use city_inventory_models::{ServiceChanges, StoredService};

use crate::fields::ServiceFields;

fn changed(row: Option<&String>, stored: Option<&String>) -> Option<String> {
    row.filter(|value| Some(*value) != stored).cloned()
}

/// Compares row fields with a stored service.
///
/// A field changes only when the row supplies a value that differs from
/// the stored one. Capacity also changes when the stored value is a
/// placeholder. The result always carries `touched_at`.
#[must_use]
pub fn compute_changes(
    stored: &StoredService,
    fields: &ServiceFields,
    touched_at: NaiveDateTime,
) -> ServiceChanges {
    let capacity = fields
        .capacity
        .filter(|c| stored.capacity != Some(*c) || !stored.is_capacity_real);

    let properties: serde_json::Map<String, serde_json::Value> = fields
        .properties
        .iter()
        .filter(|(key, value)| stored.properties.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    ServiceChanges {
        name: changed(Some(&fields.name), Some(&stored.name)),
        opening_hours: changed(fields.opening_hours.as_ref(), stored.opening_hours.as_ref()),
        website: changed(fields.website.as_ref(), stored.website.as_ref()),
        phone: changed(fields.phone.as_ref(), stored.phone.as_ref()),
        capacity,
        properties: (!properties.is_empty()).then_some(properties),
        touched_at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn stored() -> StoredService {
        StoredService {
            name: "Library".to_string(),
            opening_hours: Some("Mo-Fr 10:00-20:00".to_string()),
            website: None,
            phone: Some("+7 812 000 00 00".to_string()),
            capacity: Some(40),
            is_capacity_real: true,
            properties: serde_json::Map::new(),
        }
    }

    fn fields() -> ServiceFields {
        ServiceFields {
            name: "Library".to_string(),
            opening_hours: Some("Mo-Fr 10:00-20:00".to_string()),
            website: None,
            phone: Some("+7 812 000 00 00".to_string()),
            capacity: None,
            unparsed_capacity: None,
            external_id: None,
            properties: serde_json::Map::new(),
        }
    }

    #[test]
    fn identical_row_only_touches() {
        let changes = compute_changes(&stored(), &fields(), now());
        assert!(changes.is_touch_only());
        assert_eq!(changes.touched_at, now());
    }

    #[test]
    fn absent_values_never_clear_stored_ones() {
        let row = ServiceFields {
            opening_hours: None,
            phone: None,
            ..fields()
        };
        assert!(compute_changes(&stored(), &row, now()).is_touch_only());
    }

    #[test]
    fn differing_values_are_listed() {
        let row = ServiceFields {
            website: Some("https://library.example".to_string()),
            phone: Some("+7 812 111 11 11".to_string()),
            ..fields()
        };
        let changes = compute_changes(&stored(), &row, now());
        assert_eq!(changes.changed_fields(), vec!["website", "phone"]);
    }

    #[test]
    fn equal_capacity_changes_only_placeholders() {
        let row = ServiceFields {
            capacity: Some(40),
            ..fields()
        };
        assert!(compute_changes(&stored(), &row, now()).is_touch_only());

        let placeholder = StoredService {
            is_capacity_real: false,
            ..stored()
        };
        assert_eq!(
            compute_changes(&placeholder, &row, now()).capacity,
            Some(40)
        );
    }

    #[test]
    fn only_differing_properties_are_merged() {
        let mut stored = stored();
        stored
            .properties
            .insert("floors".to_string(), serde_json::json!(3));

        let mut row = fields();
        row.properties
            .insert("floors".to_string(), serde_json::json!(3));
        row.properties
            .insert("wifi".to_string(), serde_json::json!(true));

        let changes = compute_changes(&stored, &row, now());
        let properties = changes.properties.unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["wifi"], serde_json::json!(true));
    }
}
