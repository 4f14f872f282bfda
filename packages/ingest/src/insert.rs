//! Creation of new services.

use chrono::NaiveDateTime;
use city_inventory_database::{DbError, InventoryStore};
use city_inventory_models::{NewService, ServiceTypeDescriptor};
use rand::Rng as _;

use crate::fields::ServiceFields;

/// Picks the capacity for a new service.
///
/// Returns the row's capacity marked real, or a uniform random value
/// within the service type's bounds marked as a placeholder.
#[must_use]
pub fn choose_capacity(fields: &ServiceFields, service_type: &ServiceTypeDescriptor) -> (i32, bool) {
    if let Some(capacity) = fields.capacity {
        return (capacity, true);
    }

    if let Some(raw) = &fields.unparsed_capacity {
        log::warn!(
            "Capacity {raw:?} of {:?} is not an integer, using a placeholder",
            fields.name
        );
    }

    let (low, high) = service_type.capacity_bounds();
    (rand::rng().random_range(low..=high), false)
}

/// Inserts a functional object for the row on a physical object.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_service<S: InventoryStore + ?Sized>(
    store: &mut S,
    physical_object_id: i64,
    service_type: &ServiceTypeDescriptor,
    fields: &ServiceFields,
    created_at: NaiveDateTime,
) -> Result<i64, DbError> {
    let (capacity, is_capacity_real) = choose_capacity(fields, service_type);

    let id = store
        .insert_service(&NewService {
            physical_object_id,
            service_type_id: service_type.id,
            function_id: service_type.function_id,
            infrastructure_id: service_type.infrastructure_id,
            name: fields.name.clone(),
            opening_hours: fields.opening_hours.clone(),
            website: fields.website.clone(),
            phone: fields.phone.clone(),
            capacity,
            is_capacity_real,
            properties: fields.properties.clone(),
            created_at,
        })
        .await?;

    log::trace!(
        "Inserted functional object {id} ({:?}) on physical object {physical_object_id}",
        fields.name
    );

    Ok(id)
}
