//! Per-row reconciliation.
//!
//! A row is located (geometry or coordinates), its address is reduced to a
//! suffix for building-typed services, and an existing physical object is
//! looked up by address and then by geometry. The service is then updated
//! in place, attached to the found object, or created together with a new
//! object.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use city_inventory_coercion::{CoercionError, coerce_text};
use city_inventory_database::{
    DbError, GeometrySearch, InventoryStore, store::ADDRESS_MATCH_RADIUS_METERS,
};
use city_inventory_ingest_models::{
    InputMapping, InputRow, PropertyBinding, RowOutcome, RowStatus,
};
use city_inventory_models::{
    BuildingFilter, NewPhysicalObject, ObjectMatch, ServiceTypeDescriptor, Territories,
};

use crate::{
    address::{AddressPrefixes, clean_address},
    fields::ServiceFields,
    insert::insert_service,
    location::{Location, resolve_location},
    update::compute_changes,
};

/// Why a row did not produce an insert or update.
#[derive(Debug, thiserror::Error)]
pub enum RowFailure {
    /// The row's data cannot be reconciled.
    #[error("{message}")]
    Skipped {
        /// Skip classification.
        status: RowStatus,
        /// Explanation.
        message: String,
    },

    /// A mapped value could not be coerced to its declared type.
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// The store failed.
    #[error(transparent)]
    Backend(#[from] DbError),
}

impl RowFailure {
    /// A data skip.
    #[must_use]
    pub fn skip(status: RowStatus, message: impl Into<String>) -> Self {
        Self::Skipped {
            status,
            message: message.into(),
        }
    }

    /// The skip outcome recorded for this failure.
    ///
    /// Geometries rejected by the backend count as invalid geometry; every
    /// other error is a row error.
    #[must_use]
    pub fn into_outcome(self) -> RowOutcome {
        match self {
            Self::Skipped { status, message } => RowOutcome::skipped(status, message),
            Self::Backend(e) if e.is_invalid_geometry() => {
                RowOutcome::skipped(RowStatus::SkippedInvalidGeometry, e.to_string())
            }
            Self::Coercion(e) => RowOutcome::skipped(RowStatus::SkippedError, e.to_string()),
            Self::Backend(e) => RowOutcome::skipped(RowStatus::SkippedError, e.to_string()),
        }
    }
}

/// Batch-wide parameters shared by every row.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    /// Resolved city.
    pub city_id: i64,
    /// Resolved service type.
    pub service_type: &'a ServiceTypeDescriptor,
    /// Normalized mapping.
    pub mapping: &'a InputMapping,
    /// Property bindings.
    pub properties: &'a BTreeMap<String, PropertyBinding>,
    /// Address prefixes, longest first.
    pub prefixes: &'a AddressPrefixes,
    /// Prefix of new building addresses.
    pub new_prefix: &'a str,
    /// Timestamp written to created or updated services.
    pub now: NaiveDateTime,
}

/// Reduces the row's address to the part after the city prefix.
///
/// `Ok(None)` means the row has no address; the row then proceeds without
/// one. An address equal to a prefix yields an empty suffix: it is never
/// searched for, but a new building still gets the bare new prefix.
fn resolve_address(
    row: &InputRow,
    mapping: &InputMapping,
    prefixes: &AddressPrefixes,
) -> Result<Option<String>, RowFailure> {
    let Some(raw) = row.field(mapping.address.as_deref()).and_then(coerce_text) else {
        return Ok(None);
    };
    let address = clean_address(&raw);
    if address.is_empty() {
        return Ok(None);
    }

    match prefixes.suffix(&address) {
        Some(suffix) => Ok(Some(suffix.to_string())),
        None => Err(RowFailure::skip(
            RowStatus::SkippedInvalidAddress,
            format!("address {address:?} matches no configured prefix"),
        )),
    }
}

/// Inserts or updates the row's service on a found physical object.
async fn attach<S: InventoryStore + ?Sized>(
    store: &mut S,
    ctx: &RowContext<'_>,
    found: &ObjectMatch,
    location: &Location,
    fields: &ServiceFields,
    status: RowStatus,
) -> Result<RowOutcome, RowFailure> {
    let physical_object_id = found.physical_object_id;

    if let Some(id) = store
        .find_service(physical_object_id, ctx.service_type.id, &fields.name)
        .await?
    {
        let stored = store.get_service(id).await?;
        let changes = compute_changes(&stored, fields, ctx.now);
        store.update_service(id, &changes).await?;

        let changed: Vec<String> = changes
            .changed_fields()
            .into_iter()
            .map(str::to_string)
            .collect();
        log::debug!("Updated functional object {id}: {changed:?}");
        return Ok(RowOutcome::updated(
            id,
            physical_object_id,
            found.building_id,
            changed,
        ));
    }

    if found.geometry_kind.is_point() {
        if let Some(geojson) = location.non_point_geometry() {
            log::debug!("Upgrading point geometry of physical object {physical_object_id}");
            store
                .replace_geometry(physical_object_id, geojson, location.point())
                .await?;
        }
    }

    let id = insert_service(
        store,
        physical_object_id,
        ctx.service_type,
        fields,
        ctx.now,
    )
    .await?;

    Ok(RowOutcome::inserted(
        status,
        id,
        physical_object_id,
        found.building_id,
    ))
}

/// Creates a physical object (and building) for the row, then the service.
async fn create<S: InventoryStore + ?Sized>(
    store: &mut S,
    ctx: &RowContext<'_>,
    location: &Location,
    suffix: Option<&str>,
    territories: Territories,
    fields: &ServiceFields,
) -> Result<RowOutcome, RowFailure> {
    let physical_object_id = store
        .insert_physical_object(&NewPhysicalObject {
            city_id: ctx.city_id,
            external_id: fields.external_id.clone(),
            geometry: location.object_geometry(),
            centroid: location.point(),
            territories,
        })
        .await?;

    let building_id = if ctx.service_type.is_building {
        let address = suffix.map(|s| format!("{}{s}", ctx.new_prefix));
        Some(
            store
                .insert_building(physical_object_id, address.as_deref())
                .await?,
        )
    } else {
        None
    };

    let id = insert_service(
        store,
        physical_object_id,
        ctx.service_type,
        fields,
        ctx.now,
    )
    .await?;

    log::debug!(
        "Created physical object {physical_object_id} for functional object {id} ({:?})",
        fields.name
    );

    Ok(RowOutcome::inserted(
        RowStatus::InsertedNew,
        id,
        physical_object_id,
        building_id,
    ))
}

/// Reconciles one row against the inventory.
///
/// Writes go to the store's open transaction; the caller owns the
/// checkpoint that undoes them on failure.
///
/// # Errors
///
/// Returns [`RowFailure::Skipped`] for rows whose data cannot be
/// reconciled, and [`RowFailure::Coercion`] or [`RowFailure::Backend`] when
/// processing fails.
pub async fn reconcile_row<S: InventoryStore + ?Sized>(
    store: &mut S,
    ctx: &RowContext<'_>,
    row: &InputRow,
) -> Result<RowOutcome, RowFailure> {
    let location = resolve_location(&*store, row, ctx.mapping).await?;

    let suffix = if ctx.service_type.is_building {
        resolve_address(row, ctx.mapping, ctx.prefixes)?
    } else {
        None
    };

    let fields = ServiceFields::from_row(row, ctx.mapping, ctx.properties, ctx.service_type)?;
    let point = location.point();
    let territories = store.find_territories(ctx.city_id, point).await?;

    if let Some(suffix) = suffix.as_deref().filter(|s| !s.is_empty()) {
        if let Some(found) = store
            .find_building_by_address(ctx.city_id, suffix, point, ADDRESS_MATCH_RADIUS_METERS)
            .await?
        {
            log::debug!(
                "Address {suffix:?} matched physical object {}",
                found.physical_object_id
            );
            return attach(
                store,
                ctx,
                &found,
                &location,
                &fields,
                RowStatus::InsertedByAddressMatch,
            )
            .await;
        }
    }

    let search = GeometrySearch {
        city_id: ctx.city_id,
        shape: location.search_shape(),
        buildings: BuildingFilter::for_service_type(ctx.service_type.is_building),
        territories,
    };
    if let Some(found) = store.find_object_by_geometry(&search).await? {
        log::debug!(
            "Geometry matched physical object {}",
            found.physical_object_id
        );
        return attach(
            store,
            ctx,
            &found,
            &location,
            &fields,
            RowStatus::InsertedByGeometryMatch,
        )
        .await;
    }

    create(store, ctx, &location, suffix.as_deref(), territories, &fields).await
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use city_inventory_database::MemoryStore;

    use super::*;

    const BLOCK: &str = r#"{"type":"Polygon","coordinates":[[[30.0,59.0],[30.002,59.0],[30.002,59.002],[30.0,59.002],[30.0,59.0]]]}"#;

    struct Fixture {
        store: MemoryStore,
        city_id: i64,
        service_type: ServiceTypeDescriptor,
        mapping: InputMapping,
        properties: BTreeMap<String, PropertyBinding>,
        prefixes: AddressPrefixes,
    }

    impl Fixture {
        fn new(is_building: bool) -> Self {
            let mut store = MemoryStore::new();
            let city_id = store.add_city("Saint Petersburg", Some("spb"));
            let service_type = store.add_service_type("pharmacy", None, is_building, (5, 15));
            Self {
                store,
                city_id,
                service_type,
                mapping: InputMapping {
                    name: Some("name".to_string()),
                    address: Some("address".to_string()),
                    latitude: Some("lat".to_string()),
                    longitude: Some("lon".to_string()),
                    geometry: Some("geometry".to_string()),
                    ..InputMapping::default()
                },
                properties: BTreeMap::new(),
                prefixes: AddressPrefixes::new(&["Saint Petersburg".to_string()]),
            }
        }

        async fn run(&mut self, row: &InputRow) -> Result<RowOutcome, RowFailure> {
            let ctx = RowContext {
                city_id: self.city_id,
                service_type: &self.service_type,
                mapping: &self.mapping,
                properties: &self.properties,
                prefixes: &self.prefixes,
                new_prefix: "Saint Petersburg, ",
                now: NaiveDate::from_ymd_opt(2024, 5, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            };
            reconcile_row(&mut self.store, &ctx, row).await
        }
    }

    #[tokio::test]
    async fn new_building_gets_prefixed_address() {
        let mut fx = Fixture::new(true);
        let row = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, Nevsky 10?")
            .with("lat", 59.001)
            .with("lon", 30.001);

        let outcome = fx.run(&row).await.unwrap();
        assert_eq!(outcome.status, RowStatus::InsertedNew);

        let buildings = fx.store.buildings();
        assert_eq!(buildings.len(), 1);
        assert_eq!(
            buildings[0].address.as_deref(),
            Some("Saint Petersburg, Nevsky 10")
        );
        assert_eq!(outcome.building_id, Some(buildings[0].id));
    }

    #[tokio::test]
    async fn absent_address_creates_building_without_address() {
        let mut fx = Fixture::new(true);
        let row = InputRow::new().with("lat", 59.001).with("lon", 30.001);

        let outcome = fx.run(&row).await.unwrap();
        assert_eq!(outcome.status, RowStatus::InsertedNew);
        assert_eq!(fx.store.buildings()[0].address, None);
        assert_eq!(
            fx.store.services()[0].name,
            "(pharmacy without a name)"
        );
    }

    #[tokio::test]
    async fn bare_prefix_address_is_not_searched_but_kept() {
        let mut fx = Fixture::new(true);
        let row = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, ")
            .with("lat", 59.001)
            .with("lon", 30.001);
        fx.run(&row).await.unwrap();

        let elsewhere = row.clone().with("lat", 59.01).with("name", "Pharmacy 2");
        let outcome = fx.run(&elsewhere).await.unwrap();

        assert_eq!(outcome.status, RowStatus::InsertedNew);
        let buildings = fx.store.buildings();
        assert_eq!(buildings.len(), 2);
        assert!(
            buildings
                .iter()
                .all(|b| b.address.as_deref() == Some("Saint Petersburg, "))
        );
    }

    #[tokio::test]
    async fn trailing_comma_still_matches_existing_building() {
        let mut fx = Fixture::new(true);
        let first = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, Nevsky 10")
            .with("lat", 59.001)
            .with("lon", 30.001);
        let created = fx.run(&first).await.unwrap();

        let second = first
            .clone()
            .with("name", "Pharmacy 2")
            .with("address", "Saint Petersburg, Nevsky 10,");
        let outcome = fx.run(&second).await.unwrap();

        assert_eq!(outcome.status, RowStatus::InsertedByAddressMatch);
        assert_eq!(outcome.physical_object_id, created.physical_object_id);
        assert_eq!(fx.store.buildings().len(), 1);
    }

    #[tokio::test]
    async fn unknown_prefix_skips_the_row() {
        let mut fx = Fixture::new(true);
        let row = InputRow::new()
            .with("address", "Moscow, Tverskaya 1")
            .with("lat", 59.001)
            .with("lon", 30.001);

        let outcome = fx.run(&row).await.unwrap_err().into_outcome();
        assert_eq!(outcome.status, RowStatus::SkippedInvalidAddress);
    }

    #[tokio::test]
    async fn address_match_attaches_to_existing_building() {
        let mut fx = Fixture::new(true);
        let first = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, Nevsky 10")
            .with("lat", 59.001)
            .with("lon", 30.001);
        let created = fx.run(&first).await.unwrap();

        // 50 m away, different name: attaches to the same building.
        let second = InputRow::new()
            .with("name", "Pharmacy 2")
            .with("address", "Saint Petersburg,   Nevsky 10")
            .with("lat", 59.001_45)
            .with("lon", 30.001);
        let outcome = fx.run(&second).await.unwrap();

        assert_eq!(outcome.status, RowStatus::InsertedByAddressMatch);
        assert_eq!(outcome.physical_object_id, created.physical_object_id);
        assert_eq!(fx.store.physical_objects().len(), 1);
        assert_eq!(fx.store.services().len(), 2);
    }

    #[tokio::test]
    async fn address_beyond_distance_gate_falls_through_to_geometry() {
        let mut fx = Fixture::new(true);
        let first = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, Nevsky 10")
            .with("lat", 59.001)
            .with("lon", 30.001);
        fx.run(&first).await.unwrap();

        // Same address about 1 km away: a second building is created.
        let far = InputRow::new()
            .with("name", "Pharmacy 1")
            .with("address", "Saint Petersburg, Nevsky 10")
            .with("lat", 59.01)
            .with("lon", 30.001);
        let outcome = fx.run(&far).await.unwrap();

        assert_eq!(outcome.status, RowStatus::InsertedNew);
        assert_eq!(fx.store.buildings().len(), 2);
    }

    #[tokio::test]
    async fn point_object_is_upgraded_to_row_polygon() {
        let mut fx = Fixture::new(false);
        let point_row = InputRow::new()
            .with("name", "Kiosk")
            .with("lat", 59.001)
            .with("lon", 30.001);
        let created = fx.run(&point_row).await.unwrap();

        let polygon_row = InputRow::new()
            .with("name", "Pharmacy")
            .with("geometry", BLOCK);
        let outcome = fx.run(&polygon_row).await.unwrap();

        assert_eq!(outcome.status, RowStatus::InsertedByGeometryMatch);
        assert_eq!(outcome.physical_object_id, created.physical_object_id);
        let objects = fx.store.physical_objects();
        assert_eq!(objects.len(), 1);
        assert!(!objects[0].geometry_kind.is_point());
    }

    #[tokio::test]
    async fn malformed_geometry_is_skipped() {
        let mut fx = Fixture::new(false);
        let row = InputRow::new()
            .with("geometry", r#"{"type":"Polygon","coordinates":"nope"}"#)
            .with("lat", 59.001)
            .with("lon", 30.001);
        let outcome = fx.run(&row).await.unwrap_err().into_outcome();
        assert_eq!(outcome.status, RowStatus::SkippedInvalidGeometry);
        assert!(fx.store.physical_objects().is_empty());
    }
}
