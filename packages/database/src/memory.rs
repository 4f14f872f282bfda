//! In-process [`InventoryStore`].
//!
//! Reference data (cities, service types, territories) is seeded directly
//! and is not transactional. Physical objects, buildings and services live
//! in an [`Inventory`] that is snapshotted on `begin` and on every
//! savepoint; rolling back restores the snapshot. Ids come from one
//! store-wide counter that, like a database sequence, is never rolled
//! back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use city_inventory_models::{
    Building, BuildingFilter, City, Coordinates, FunctionalObject, GeometryCentroid,
    NewPhysicalObject, NewService, ObjectGeometry, ObjectMatch, PhysicalObject, ServiceChanges,
    ServiceTypeDescriptor, StoredService, Territories,
};
use city_inventory_spatial::{
    ObjectIndex, SpatialError, covers_point, geodesic_distance_m, geometries_intersect,
    geometry_kind, parse_geometry, point_geometry, point_matches,
};
use geo::Geometry;

use crate::{
    DbError,
    store::{
        GeometrySearch, InventoryStore, POINT_MATCH_TOLERANCE_DEG, SearchShape,
        validate_savepoint_name,
    },
};

#[derive(Clone)]
struct StoredObject {
    record: PhysicalObject,
    geometry: Geometry<f64>,
}

#[derive(Clone, Default)]
struct Inventory {
    objects: BTreeMap<i64, StoredObject>,
    buildings: BTreeMap<i64, Building>,
    services: BTreeMap<i64, FunctionalObject>,
    index: ObjectIndex,
}

impl Inventory {
    fn building_of(&self, physical_object_id: i64) -> Option<&Building> {
        self.buildings
            .values()
            .find(|b| b.physical_object_id == physical_object_id)
    }

    fn object_match(&self, object: &StoredObject) -> ObjectMatch {
        let building = self.building_of(object.record.id);
        ObjectMatch {
            physical_object_id: object.record.id,
            building_id: building.map(|b| b.id),
            address: building.and_then(|b| b.address.clone()),
            geometry_kind: object.record.geometry_kind,
        }
    }
}

struct Territory {
    id: i64,
    city_id: i64,
    geometry: Geometry<f64>,
}

fn invalid_geometry(e: SpatialError) -> DbError {
    DbError::InvalidGeometry {
        message: e.to_string(),
    }
}

fn check_capacity(capacity: i32) -> Result<(), DbError> {
    if capacity < 0 {
        return Err(DbError::Constraint {
            message: format!("functional_objects.capacity must be non-negative, got {capacity}"),
        });
    }
    Ok(())
}

/// Transaction statements that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// `SAVEPOINT`.
    Savepoint,
    /// `RELEASE SAVEPOINT`.
    Release,
    /// `COMMIT`.
    Commit,
}

/// An inventory held in memory with the same matching semantics as
/// [`crate::PostgisStore`].
#[derive(Default)]
pub struct MemoryStore {
    cities: Vec<City>,
    service_types: Vec<ServiceTypeDescriptor>,
    municipalities: Vec<Territory>,
    administrative_units: Vec<Territory>,
    inventory: Inventory,
    transaction: Option<Inventory>,
    savepoints: Vec<(String, Inventory)>,
    next_id: i64,
    commits: usize,
    failures: Vec<FailPoint>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("cities", &self.cities.len())
            .field("objects", &self.inventory.objects.len())
            .field("buildings", &self.inventory.buildings.len())
            .field("services", &self.inventory.services.len())
            .field("in_transaction", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Adds a city, returning its id.
    pub fn add_city(&mut self, name: &str, code: Option<&str>) -> i64 {
        let id = self.allocate_id();
        self.cities.push(City {
            id,
            name: name.to_string(),
            code: code.map(str::to_string),
        });
        id
    }

    /// Adds a service type with freshly allocated function and
    /// infrastructure ids.
    pub fn add_service_type(
        &mut self,
        name: &str,
        code: Option<&str>,
        is_building: bool,
        capacity: (i32, i32),
    ) -> ServiceTypeDescriptor {
        let infrastructure_id = self.allocate_id();
        let function_id = self.allocate_id();
        let id = self.allocate_id();
        let descriptor = ServiceTypeDescriptor {
            id,
            name: name.to_string(),
            code: code.map(str::to_string),
            function_id,
            infrastructure_id,
            is_building,
            capacity_min: capacity.0,
            capacity_max: capacity.1,
        };
        self.service_types.push(descriptor.clone());
        descriptor
    }

    /// Adds a municipality with the given `GeoJSON` boundary.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidGeometry`] if the boundary cannot be
    /// parsed.
    pub fn add_municipality(&mut self, city_id: i64, geojson: &str) -> Result<i64, DbError> {
        let geometry = parse_geometry(geojson).map_err(invalid_geometry)?;
        let id = self.allocate_id();
        self.municipalities.push(Territory {
            id,
            city_id,
            geometry,
        });
        Ok(id)
    }

    /// Adds an administrative unit with the given `GeoJSON` boundary.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidGeometry`] if the boundary cannot be
    /// parsed.
    pub fn add_administrative_unit(&mut self, city_id: i64, geojson: &str) -> Result<i64, DbError> {
        let geometry = parse_geometry(geojson).map_err(invalid_geometry)?;
        let id = self.allocate_id();
        self.administrative_units.push(Territory {
            id,
            city_id,
            geometry,
        });
        Ok(id)
    }

    /// Physical objects in id order.
    #[must_use]
    pub fn physical_objects(&self) -> Vec<PhysicalObject> {
        self.inventory
            .objects
            .values()
            .map(|o| o.record.clone())
            .collect()
    }

    /// Buildings in id order.
    #[must_use]
    pub fn buildings(&self) -> Vec<Building> {
        self.inventory.buildings.values().cloned().collect()
    }

    /// Functional objects in id order.
    #[must_use]
    pub fn services(&self) -> Vec<FunctionalObject> {
        self.inventory.services.values().cloned().collect()
    }

    /// A functional object by id.
    #[must_use]
    pub fn service(&self, id: i64) -> Option<&FunctionalObject> {
        self.inventory.services.get(&id)
    }

    /// Number of transactions committed so far.
    #[must_use]
    pub const fn commit_count(&self) -> usize {
        self.commits
    }

    /// Makes the next `point` statement fail without effect.
    pub fn fail_once(&mut self, point: FailPoint) {
        self.failures.push(point);
    }

    fn check_failure(&mut self, point: FailPoint) -> Result<(), DbError> {
        match self.failures.iter().position(|p| *p == point) {
            Some(position) => {
                self.failures.remove(position);
                Err(DbError::Transaction {
                    message: format!("{point:?} failed"),
                })
            }
            None => Ok(()),
        }
    }

    fn territory_at(territories: &[Territory], city_id: i64, point: Coordinates) -> Option<i64> {
        territories
            .iter()
            .filter(|t| t.city_id == city_id && covers_point(&t.geometry, point))
            .map(|t| t.id)
            .min()
    }

    fn savepoint_position(&self, name: &str) -> Result<usize, DbError> {
        if self.transaction.is_none() {
            return Err(DbError::Transaction {
                message: "No open transaction".to_string(),
            });
        }
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DbError::Transaction {
                message: format!("Savepoint {name} does not exist"),
            })
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn find_city(&self, name_or_code: &str) -> Result<Option<City>, DbError> {
        Ok(self
            .cities
            .iter()
            .find(|c| c.name == name_or_code || c.code.as_deref() == Some(name_or_code))
            .cloned())
    }

    async fn find_service_types(
        &self,
        name_or_code: &str,
    ) -> Result<Vec<ServiceTypeDescriptor>, DbError> {
        let mut found: Vec<ServiceTypeDescriptor> = self
            .service_types
            .iter()
            .filter(|st| st.name == name_or_code || st.code.as_deref() == Some(name_or_code))
            .cloned()
            .collect();
        found.sort_by_key(|st| st.id);
        Ok(found)
    }

    async fn geometry_centroid(&self, geojson: &str) -> Result<GeometryCentroid, DbError> {
        let geometry = parse_geometry(geojson).map_err(invalid_geometry)?;
        Ok(GeometryCentroid {
            kind: geometry_kind(&geometry),
            centroid: city_inventory_spatial::centroid(&geometry).map_err(invalid_geometry)?,
        })
    }

    async fn find_territories(
        &self,
        city_id: i64,
        point: Coordinates,
    ) -> Result<Territories, DbError> {
        Ok(Territories {
            municipality_id: Self::territory_at(&self.municipalities, city_id, point),
            administrative_unit_id: Self::territory_at(&self.administrative_units, city_id, point),
        })
    }

    async fn find_building_by_address(
        &self,
        city_id: i64,
        suffix: &str,
        point: Coordinates,
        max_distance_m: f64,
    ) -> Result<Option<ObjectMatch>, DbError> {
        Ok(self
            .inventory
            .objects
            .values()
            .filter(|o| o.record.city_id == city_id)
            .filter(|o| {
                self.inventory
                    .building_of(o.record.id)
                    .and_then(|b| b.address.as_deref())
                    .is_some_and(|address| address.ends_with(suffix))
            })
            .find(|o| geodesic_distance_m(o.record.centroid, point) < max_distance_m)
            .map(|o| self.inventory.object_match(o)))
    }

    async fn find_object_by_geometry(
        &self,
        search: &GeometrySearch<'_>,
    ) -> Result<Option<ObjectMatch>, DbError> {
        let probe = match search.shape {
            SearchShape::GeoJson(geojson) => parse_geometry(geojson).map_err(invalid_geometry)?,
            SearchShape::Point(point) => point_geometry(point),
        };

        for id in self
            .inventory
            .index
            .candidates(&probe, POINT_MATCH_TOLERANCE_DEG)
        {
            let Some(object) = self.inventory.objects.get(&id) else {
                continue;
            };
            let record = &object.record;
            if record.city_id != search.city_id {
                continue;
            }

            let has_building = self.inventory.building_of(id).is_some();
            let building_ok = match search.buildings {
                BuildingFilter::WithBuilding => has_building,
                BuildingFilter::WithoutBuilding => !has_building,
            };
            if !building_ok {
                continue;
            }

            if search
                .territories
                .municipality_id
                .is_some_and(|m| record.territories.municipality_id != Some(m))
                || search
                    .territories
                    .administrative_unit_id
                    .is_some_and(|a| record.territories.administrative_unit_id != Some(a))
            {
                continue;
            }

            let matches = match search.shape {
                SearchShape::GeoJson(_) => geometries_intersect(&object.geometry, &probe),
                SearchShape::Point(point) => {
                    point_matches(&object.geometry, point, POINT_MATCH_TOLERANCE_DEG)
                        || covers_point(&object.geometry, point)
                }
            };
            if matches {
                return Ok(Some(self.inventory.object_match(object)));
            }
        }

        Ok(None)
    }

    async fn find_service(
        &self,
        physical_object_id: i64,
        service_type_id: i64,
        name: &str,
    ) -> Result<Option<i64>, DbError> {
        Ok(self
            .inventory
            .services
            .values()
            .find(|s| {
                s.physical_object_id == physical_object_id
                    && s.service_type_id == service_type_id
                    && s.name == name
            })
            .map(|s| s.id))
    }

    async fn get_service(&self, id: i64) -> Result<StoredService, DbError> {
        self.inventory
            .services
            .get(&id)
            .map(StoredService::from)
            .ok_or(DbError::NotFound {
                entity: "functional_objects",
                id,
            })
    }

    async fn insert_physical_object(&mut self, object: &NewPhysicalObject) -> Result<i64, DbError> {
        if !self.cities.iter().any(|c| c.id == object.city_id) {
            return Err(DbError::Constraint {
                message: format!("physical_objects.city_id references missing city {}", object.city_id),
            });
        }

        let geometry = match &object.geometry {
            ObjectGeometry::GeoJson(geojson) => {
                parse_geometry(geojson).map_err(invalid_geometry)?
            }
            ObjectGeometry::Point(point) => point_geometry(*point),
        };

        let id = self.allocate_id();
        self.inventory.index.insert(id, &geometry);
        self.inventory.objects.insert(
            id,
            StoredObject {
                record: PhysicalObject {
                    id,
                    city_id: object.city_id,
                    external_id: object.external_id.clone(),
                    geometry_kind: geometry_kind(&geometry),
                    centroid: object.centroid,
                    territories: object.territories,
                },
                geometry,
            },
        );
        Ok(id)
    }

    async fn insert_building(
        &mut self,
        physical_object_id: i64,
        address: Option<&str>,
    ) -> Result<i64, DbError> {
        if !self.inventory.objects.contains_key(&physical_object_id) {
            return Err(DbError::Constraint {
                message: format!(
                    "buildings.physical_object_id references missing object {physical_object_id}"
                ),
            });
        }
        if self.inventory.building_of(physical_object_id).is_some() {
            return Err(DbError::Constraint {
                message: format!("Physical object {physical_object_id} already has a building"),
            });
        }

        let id = self.allocate_id();
        self.inventory.buildings.insert(
            id,
            Building {
                id,
                physical_object_id,
                address: address.map(str::to_string),
            },
        );
        Ok(id)
    }

    async fn insert_service(&mut self, service: &NewService) -> Result<i64, DbError> {
        if !self
            .inventory
            .objects
            .contains_key(&service.physical_object_id)
        {
            return Err(DbError::Constraint {
                message: format!(
                    "functional_objects.physical_object_id references missing object {}",
                    service.physical_object_id
                ),
            });
        }
        if !self
            .service_types
            .iter()
            .any(|st| st.id == service.service_type_id)
        {
            return Err(DbError::Constraint {
                message: format!(
                    "functional_objects.city_service_type_id references missing type {}",
                    service.service_type_id
                ),
            });
        }
        check_capacity(service.capacity)?;

        let id = self.allocate_id();
        self.inventory.services.insert(
            id,
            FunctionalObject {
                id,
                physical_object_id: service.physical_object_id,
                service_type_id: service.service_type_id,
                function_id: service.function_id,
                infrastructure_id: service.infrastructure_id,
                name: service.name.clone(),
                opening_hours: service.opening_hours.clone(),
                website: service.website.clone(),
                phone: service.phone.clone(),
                capacity: Some(service.capacity),
                is_capacity_real: service.is_capacity_real,
                properties: service.properties.clone(),
                created_at: service.created_at,
                updated_at: service.created_at,
            },
        );
        Ok(id)
    }

    async fn update_service(&mut self, id: i64, changes: &ServiceChanges) -> Result<(), DbError> {
        if let Some(capacity) = changes.capacity {
            check_capacity(capacity)?;
        }

        let service = self
            .inventory
            .services
            .get_mut(&id)
            .ok_or(DbError::NotFound {
                entity: "functional_objects",
                id,
            })?;

        if let Some(name) = &changes.name {
            service.name.clone_from(name);
        }
        if let Some(opening_hours) = &changes.opening_hours {
            service.opening_hours = Some(opening_hours.clone());
        }
        if let Some(website) = &changes.website {
            service.website = Some(website.clone());
        }
        if let Some(phone) = &changes.phone {
            service.phone = Some(phone.clone());
        }
        if let Some(capacity) = changes.capacity {
            service.capacity = Some(capacity);
            service.is_capacity_real = true;
        }
        if let Some(properties) = &changes.properties {
            service
                .properties
                .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        service.updated_at = changes.touched_at;

        Ok(())
    }

    async fn replace_geometry(
        &mut self,
        physical_object_id: i64,
        geojson: &str,
        centroid: Coordinates,
    ) -> Result<(), DbError> {
        let geometry = parse_geometry(geojson).map_err(invalid_geometry)?;
        let object = self
            .inventory
            .objects
            .get_mut(&physical_object_id)
            .ok_or(DbError::NotFound {
                entity: "physical_objects",
                id: physical_object_id,
            })?;

        object.record.geometry_kind = geometry_kind(&geometry);
        object.record.centroid = centroid;
        object.geometry = geometry;
        self.inventory
            .index
            .insert(physical_object_id, &object.geometry);
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if self.transaction.is_some() {
            return Err(DbError::Transaction {
                message: "Transaction already open".to_string(),
            });
        }
        self.transaction = Some(self.inventory.clone());
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), DbError> {
        validate_savepoint_name(name)?;
        self.check_failure(FailPoint::Savepoint)?;
        if self.transaction.is_none() {
            return Err(DbError::Transaction {
                message: "SAVEPOINT outside a transaction".to_string(),
            });
        }
        self.savepoints
            .push((name.to_string(), self.inventory.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position + 1);
        self.inventory = self.savepoints[position].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        self.check_failure(FailPoint::Release)?;
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.check_failure(FailPoint::Commit)?;
        if self.transaction.take().is_none() {
            return Err(DbError::Transaction {
                message: "No open transaction".to_string(),
            });
        }
        self.savepoints.clear();
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let snapshot = self.transaction.take().ok_or_else(|| DbError::Transaction {
            message: "No open transaction".to_string(),
        })?;
        self.inventory = snapshot;
        self.savepoints.clear();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const BLOCK: &str = r#"{"type":"Polygon","coordinates":[[[30.0,59.0],[30.002,59.0],[30.002,59.002],[30.0,59.002],[30.0,59.0]]]}"#;
    const DISTRICT: &str = r#"{"type":"Polygon","coordinates":[[[29.0,58.0],[31.0,58.0],[31.0,60.0],[29.0,60.0],[29.0,58.0]]]}"#;

    fn point_object(city_id: i64, longitude: f64, latitude: f64) -> NewPhysicalObject {
        NewPhysicalObject {
            city_id,
            external_id: None,
            geometry: ObjectGeometry::Point(Coordinates::new(longitude, latitude)),
            centroid: Coordinates::new(longitude, latitude),
            territories: Territories::default(),
        }
    }

    fn block_object(city_id: i64) -> NewPhysicalObject {
        NewPhysicalObject {
            city_id,
            external_id: Some("way/1".to_string()),
            geometry: ObjectGeometry::GeoJson(BLOCK.to_string()),
            centroid: Coordinates::new(30.001, 59.001),
            territories: Territories::default(),
        }
    }

    fn new_service(
        physical_object_id: i64,
        st: &ServiceTypeDescriptor,
        name: &str,
        capacity: i32,
    ) -> NewService {
        NewService {
            physical_object_id,
            service_type_id: st.id,
            function_id: st.function_id,
            infrastructure_id: st.infrastructure_id,
            name: name.to_string(),
            opening_hours: None,
            website: None,
            phone: None,
            capacity,
            is_capacity_real: true,
            properties: serde_json::Map::new(),
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn finds_city_by_name_or_code() {
        let mut store = MemoryStore::new();
        let id = store.add_city("Saint Petersburg", Some("spb"));
        assert_eq!(store.find_city("spb").await.unwrap().unwrap().id, id);
        assert_eq!(
            store.find_city("Saint Petersburg").await.unwrap().unwrap().id,
            id
        );
        assert!(store.find_city("Moscow").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_malformed_geometry() {
        let store = MemoryStore::new();
        let err = store.geometry_centroid("{\"type\":").await.unwrap_err();
        assert!(err.is_invalid_geometry());
    }

    #[tokio::test]
    async fn building_address_match_respects_distance() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let phys = store
            .insert_physical_object(&block_object(city))
            .await
            .unwrap();
        store
            .insert_building(phys, Some("Saint Petersburg, Nevsky 10"))
            .await
            .unwrap();

        let near = Coordinates::new(30.0012, 59.0011);
        let found = store
            .find_building_by_address(city, "Nevsky 10", near, 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.physical_object_id, phys);
        assert!(found.building_id.is_some());

        let far = Coordinates::new(30.01, 59.001);
        assert!(
            store
                .find_building_by_address(city, "Nevsky 10", far, 100.0)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn geometry_search_filters_on_building_ownership() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let bare = store
            .insert_physical_object(&block_object(city))
            .await
            .unwrap();

        let search = GeometrySearch {
            city_id: city,
            shape: SearchShape::Point(Coordinates::new(30.001, 59.001)),
            buildings: BuildingFilter::WithoutBuilding,
            territories: Territories::default(),
        };
        let found = store.find_object_by_geometry(&search).await.unwrap().unwrap();
        assert_eq!(found.physical_object_id, bare);
        assert_eq!(found.building_id, None);

        let with_building = GeometrySearch {
            buildings: BuildingFilter::WithBuilding,
            ..search
        };
        assert!(
            store
                .find_object_by_geometry(&with_building)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn point_search_prefers_lowest_id_within_tolerance() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let first = store
            .insert_physical_object(&point_object(city, 30.5, 59.5))
            .await
            .unwrap();
        store
            .insert_physical_object(&point_object(city, 30.500_05, 59.5))
            .await
            .unwrap();

        let search = GeometrySearch {
            city_id: city,
            shape: SearchShape::Point(Coordinates::new(30.500_02, 59.500_01)),
            buildings: BuildingFilter::WithoutBuilding,
            territories: Territories::default(),
        };
        let found = store.find_object_by_geometry(&search).await.unwrap().unwrap();
        assert_eq!(found.physical_object_id, first);

        let away = GeometrySearch {
            shape: SearchShape::Point(Coordinates::new(30.6, 59.5)),
            ..search
        };
        assert!(store.find_object_by_geometry(&away).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn territory_lookup_and_filter() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let municipality = store.add_municipality(city, DISTRICT).unwrap();

        let territories = store
            .find_territories(city, Coordinates::new(30.001, 59.001))
            .await
            .unwrap();
        assert_eq!(territories.municipality_id, Some(municipality));
        assert_eq!(territories.administrative_unit_id, None);

        store
            .insert_physical_object(&block_object(city))
            .await
            .unwrap();
        let search = GeometrySearch {
            city_id: city,
            shape: SearchShape::GeoJson(BLOCK),
            buildings: BuildingFilter::WithoutBuilding,
            territories,
        };
        // The stored object carries no municipality, so the filter excludes it.
        assert!(store.find_object_by_geometry(&search).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_properties_and_marks_capacity_real() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let st = store.add_service_type("cafe", None, false, (10, 50));
        let phys = store
            .insert_physical_object(&point_object(city, 30.0, 59.0))
            .await
            .unwrap();
        let mut service = new_service(phys, &st, "Coffee", 20);
        service.is_capacity_real = false;
        service
            .properties
            .insert("wifi".to_string(), serde_json::Value::Bool(false));
        let id = store.insert_service(&service).await.unwrap();

        let mut properties = serde_json::Map::new();
        properties.insert("wifi".to_string(), serde_json::Value::Bool(true));
        properties.insert("seats".to_string(), serde_json::json!(12));
        let touched_at = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let changes = ServiceChanges {
            capacity: Some(30),
            properties: Some(properties),
            ..ServiceChanges::touch(touched_at)
        };
        store.update_service(id, &changes).await.unwrap();

        let stored = store.service(id).unwrap();
        assert_eq!(stored.capacity, Some(30));
        assert!(stored.is_capacity_real);
        assert_eq!(stored.properties["wifi"], serde_json::Value::Bool(true));
        assert_eq!(stored.properties["seats"], serde_json::json!(12));
        assert_eq!(stored.updated_at, touched_at);
    }

    #[tokio::test]
    async fn negative_capacity_violates_constraint() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let st = store.add_service_type("cafe", None, false, (10, 50));
        let phys = store
            .insert_physical_object(&point_object(city, 30.0, 59.0))
            .await
            .unwrap();
        let err = store
            .insert_service(&new_service(phys, &st, "Coffee", -1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint { .. }));
    }

    #[tokio::test]
    async fn rollback_restores_state_but_not_ids() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        store.begin().await.unwrap();
        let rolled_back = store
            .insert_physical_object(&point_object(city, 30.0, 59.0))
            .await
            .unwrap();
        store.rollback().await.unwrap();
        assert!(store.physical_objects().is_empty());

        store.begin().await.unwrap();
        let kept = store
            .insert_physical_object(&point_object(city, 30.0, 59.0))
            .await
            .unwrap();
        store.commit().await.unwrap();
        assert!(kept > rolled_back);
        assert_eq!(store.physical_objects().len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_fire_once_without_effect() {
        let mut store = MemoryStore::new();
        store.begin().await.unwrap();
        store.savepoint("row").await.unwrap();

        store.fail_once(FailPoint::Release);
        assert!(store.release_savepoint("row").await.is_err());
        store.release_savepoint("row").await.unwrap();

        store.fail_once(FailPoint::Commit);
        assert!(store.commit().await.is_err());
        assert!(store.in_transaction());
        store.commit().await.unwrap();
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn upgrading_geometry_reindexes_the_object() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        let phys = store
            .insert_physical_object(&point_object(city, 30.0015, 59.0015))
            .await
            .unwrap();
        store
            .replace_geometry(phys, BLOCK, Coordinates::new(30.001, 59.001))
            .await
            .unwrap();

        let objects = store.physical_objects();
        assert!(!objects[0].geometry_kind.is_point());

        let search = GeometrySearch {
            city_id: city,
            shape: SearchShape::Point(Coordinates::new(30.0001, 59.0001)),
            buildings: BuildingFilter::WithoutBuilding,
            territories: Territories::default(),
        };
        assert!(store.find_object_by_geometry(&search).await.unwrap().is_some());
    }
}
