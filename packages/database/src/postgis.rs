//! [`InventoryStore`] backed by a `PostGIS` database.

use async_trait::async_trait;
use city_inventory_models::{
    City, Coordinates, GeometryCentroid, NewPhysicalObject, NewService, ObjectMatch,
    ServiceChanges, ServiceTypeDescriptor, StoredService, Territories,
};
use switchy_database::{Database, DatabaseTransaction};

use crate::{
    DbError, queries,
    store::{GeometrySearch, InventoryStore, validate_savepoint_name},
};

/// A `PostGIS` inventory reached through `switchy_database`.
///
/// Holds at most one open transaction. While it is open every query,
/// reads included, runs on the transaction's connection so rows written
/// earlier in the batch are visible to later lookups.
pub struct PostgisStore {
    db: Box<dyn Database>,
    tx: Option<Box<dyn DatabaseTransaction>>,
}

impl std::fmt::Debug for PostgisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgisStore")
            .field("in_transaction", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl PostgisStore {
    /// Wraps an open connection.
    #[must_use]
    pub fn new(db: Box<dyn Database>) -> Self {
        Self { db, tx: None }
    }

    fn conn(&self) -> &dyn Database {
        match &self.tx {
            Some(tx) => &**tx,
            None => &*self.db,
        }
    }

    fn tx(&self) -> Result<&dyn DatabaseTransaction, DbError> {
        self.tx.as_deref().ok_or_else(|| DbError::Transaction {
            message: "No open transaction".to_string(),
        })
    }

    fn take_tx(&mut self) -> Result<Box<dyn DatabaseTransaction>, DbError> {
        self.tx.take().ok_or_else(|| DbError::Transaction {
            message: "No open transaction".to_string(),
        })
    }
}

#[async_trait]
impl InventoryStore for PostgisStore {
    async fn find_city(&self, name_or_code: &str) -> Result<Option<City>, DbError> {
        queries::find_city(self.conn(), name_or_code).await
    }

    async fn find_service_types(
        &self,
        name_or_code: &str,
    ) -> Result<Vec<ServiceTypeDescriptor>, DbError> {
        queries::find_service_types(self.conn(), name_or_code).await
    }

    async fn geometry_centroid(&self, geojson: &str) -> Result<GeometryCentroid, DbError> {
        queries::geometry_centroid(self.conn(), geojson).await
    }

    async fn find_territories(
        &self,
        city_id: i64,
        point: Coordinates,
    ) -> Result<Territories, DbError> {
        queries::find_territories(self.conn(), city_id, point).await
    }

    async fn find_building_by_address(
        &self,
        city_id: i64,
        suffix: &str,
        point: Coordinates,
        max_distance_m: f64,
    ) -> Result<Option<ObjectMatch>, DbError> {
        queries::find_building_by_address(self.conn(), city_id, suffix, point, max_distance_m)
            .await
    }

    async fn find_object_by_geometry(
        &self,
        search: &GeometrySearch<'_>,
    ) -> Result<Option<ObjectMatch>, DbError> {
        queries::find_object_by_geometry(self.conn(), search).await
    }

    async fn find_service(
        &self,
        physical_object_id: i64,
        service_type_id: i64,
        name: &str,
    ) -> Result<Option<i64>, DbError> {
        queries::find_service(self.conn(), physical_object_id, service_type_id, name).await
    }

    async fn get_service(&self, id: i64) -> Result<StoredService, DbError> {
        queries::get_service(self.conn(), id).await
    }

    async fn insert_physical_object(&mut self, object: &NewPhysicalObject) -> Result<i64, DbError> {
        queries::insert_physical_object(self.conn(), object).await
    }

    async fn insert_building(
        &mut self,
        physical_object_id: i64,
        address: Option<&str>,
    ) -> Result<i64, DbError> {
        queries::insert_building(self.conn(), physical_object_id, address).await
    }

    async fn insert_service(&mut self, service: &NewService) -> Result<i64, DbError> {
        queries::insert_service(self.conn(), service).await
    }

    async fn update_service(&mut self, id: i64, changes: &ServiceChanges) -> Result<(), DbError> {
        queries::update_service(self.conn(), id, changes).await
    }

    async fn replace_geometry(
        &mut self,
        physical_object_id: i64,
        geojson: &str,
        centroid: Coordinates,
    ) -> Result<(), DbError> {
        queries::replace_geometry(self.conn(), physical_object_id, geojson, centroid).await
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        if self.tx.is_some() {
            return Err(DbError::Transaction {
                message: "Transaction already open".to_string(),
            });
        }
        self.tx = Some(self.db.begin_transaction().await?);
        log::debug!("Began transaction");
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), DbError> {
        validate_savepoint_name(name)?;
        self.tx()?.exec_raw(&format!("SAVEPOINT {name}")).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        validate_savepoint_name(name)?;
        self.tx()?
            .exec_raw(&format!("ROLLBACK TO SAVEPOINT {name}"))
            .await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        validate_savepoint_name(name)?;
        self.tx()?
            .exec_raw(&format!("RELEASE SAVEPOINT {name}"))
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.take_tx()?.commit().await?;
        log::debug!("Committed transaction");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.take_tx()?.rollback().await?;
        log::debug!("Rolled back transaction");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}
