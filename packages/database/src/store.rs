//! The storage seam used by the reconciliation engine.

use async_trait::async_trait;
use city_inventory_models::{
    BuildingFilter, City, Coordinates, GeometryCentroid, NewPhysicalObject, NewService,
    ObjectMatch, ServiceChanges, ServiceTypeDescriptor, StoredService, Territories,
};

use crate::DbError;

/// Per-axis tolerance, in degrees, for point-to-point geometry matches.
pub const POINT_MATCH_TOLERANCE_DEG: f64 = 1e-4;

/// Maximum geodesic distance, in meters, between a row position and a
/// building for an address match.
pub const ADDRESS_MATCH_RADIUS_METERS: f64 = 100.0;

/// Shape used to search for an existing physical object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchShape<'a> {
    /// A `GeoJSON` geometry; matches objects whose geometry intersects it.
    GeoJson(&'a str),
    /// A point; matches point objects within
    /// [`POINT_MATCH_TOLERANCE_DEG`] and other objects that cover it.
    Point(Coordinates),
}

/// Parameters of a geometry search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySearch<'a> {
    /// City to search in.
    pub city_id: i64,
    /// Shape to match against.
    pub shape: SearchShape<'a>,
    /// Building requirement.
    pub buildings: BuildingFilter,
    /// Territory filters; `None` components are not filtered on.
    pub territories: Territories,
}

/// Operations the reconciliation engine needs from the inventory.
///
/// Reads take `&self`. Writes and transaction control take `&mut self`
/// since every write belongs to the store's single open transaction.
///
/// Savepoint names must consist of ASCII letters, digits and underscores.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Finds a city by name or code.
    async fn find_city(&self, name_or_code: &str) -> Result<Option<City>, DbError>;

    /// Returns every service type whose name or code equals the argument.
    async fn find_service_types(
        &self,
        name_or_code: &str,
    ) -> Result<Vec<ServiceTypeDescriptor>, DbError>;

    /// Computes the type and centroid of a `GeoJSON` geometry.
    ///
    /// Fails with [`DbError::InvalidGeometry`] if the backend rejects it.
    async fn geometry_centroid(&self, geojson: &str) -> Result<GeometryCentroid, DbError>;

    /// Returns the city's territories enclosing a point.
    async fn find_territories(
        &self,
        city_id: i64,
        point: Coordinates,
    ) -> Result<Territories, DbError>;

    /// Finds a building in the city whose address ends with `suffix` and
    /// whose object centroid is within `max_distance_m` of `point`.
    ///
    /// On several candidates the one with the lowest physical object id
    /// wins.
    async fn find_building_by_address(
        &self,
        city_id: i64,
        suffix: &str,
        point: Coordinates,
        max_distance_m: f64,
    ) -> Result<Option<ObjectMatch>, DbError>;

    /// Finds a physical object matching a geometry search.
    ///
    /// On several candidates the one with the lowest physical object id
    /// wins.
    async fn find_object_by_geometry(
        &self,
        search: &GeometrySearch<'_>,
    ) -> Result<Option<ObjectMatch>, DbError>;

    /// Finds a functional object on a physical object by type and exact
    /// name, returning its id.
    async fn find_service(
        &self,
        physical_object_id: i64,
        service_type_id: i64,
        name: &str,
    ) -> Result<Option<i64>, DbError>;

    /// Reads the mutable fields of a functional object.
    async fn get_service(&self, id: i64) -> Result<StoredService, DbError>;

    /// Inserts a physical object, returning its id.
    async fn insert_physical_object(&mut self, object: &NewPhysicalObject) -> Result<i64, DbError>;

    /// Inserts a building wrapping a physical object, returning its id.
    async fn insert_building(
        &mut self,
        physical_object_id: i64,
        address: Option<&str>,
    ) -> Result<i64, DbError>;

    /// Inserts a functional object, returning its id.
    async fn insert_service(&mut self, service: &NewService) -> Result<i64, DbError>;

    /// Applies changes to a functional object. Always stamps `updated_at`.
    async fn update_service(&mut self, id: i64, changes: &ServiceChanges) -> Result<(), DbError>;

    /// Replaces the geometry and centroid of a physical object.
    async fn replace_geometry(
        &mut self,
        physical_object_id: i64,
        geojson: &str,
        centroid: Coordinates,
    ) -> Result<(), DbError>;

    /// Opens a transaction.
    async fn begin(&mut self) -> Result<(), DbError>;

    /// Creates a savepoint in the open transaction.
    async fn savepoint(&mut self, name: &str) -> Result<(), DbError>;

    /// Rolls the open transaction back to a savepoint, keeping it.
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError>;

    /// Releases a savepoint, keeping its writes.
    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Returns `true` while a transaction is open.
    fn in_transaction(&self) -> bool;
}

/// Validates a savepoint name so it can be spliced into SQL.
///
/// # Errors
///
/// Returns [`DbError::Transaction`] for empty names or names with
/// characters outside `[A-Za-z0-9_]`.
pub fn validate_savepoint_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DbError::Transaction {
            message: format!("Invalid savepoint name: {name:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savepoint_names_are_restricted() {
        assert!(validate_savepoint_name("row_42").is_ok());
        assert!(validate_savepoint_name("").is_err());
        assert!(validate_savepoint_name("row; DROP TABLE").is_err());
    }
}
