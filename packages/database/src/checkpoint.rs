//! Scoped savepoints.

use crate::{DbError, store::InventoryStore};

/// A savepoint in the store's open transaction.
///
/// Consumed by [`Checkpoint::release`] or [`Checkpoint::rollback`]; both
/// leave the surrounding transaction open.
#[must_use = "a checkpoint must be released or rolled back"]
#[derive(Debug)]
pub struct Checkpoint {
    name: String,
}

impl Checkpoint {
    /// Creates a savepoint called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the savepoint cannot be created.
    pub async fn acquire<S: InventoryStore + ?Sized>(
        store: &mut S,
        name: impl Into<String>,
    ) -> Result<Self, DbError> {
        let name = name.into();
        store.savepoint(&name).await?;
        log::trace!("Created savepoint {name}");
        Ok(Self { name })
    }

    /// Savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keeps everything written since the savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the release fails.
    pub async fn release<S: InventoryStore + ?Sized>(self, store: &mut S) -> Result<(), DbError> {
        store.release_savepoint(&self.name).await
    }

    /// Discards everything written since the savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the rollback or the following release fails.
    pub async fn rollback<S: InventoryStore + ?Sized>(self, store: &mut S) -> Result<(), DbError> {
        store.rollback_to_savepoint(&self.name).await?;
        store.release_savepoint(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use city_inventory_models::{Coordinates, NewPhysicalObject, ObjectGeometry, Territories};

    use super::*;
    use crate::memory::MemoryStore;

    fn object(city_id: i64) -> NewPhysicalObject {
        NewPhysicalObject {
            city_id,
            external_id: None,
            geometry: ObjectGeometry::Point(Coordinates::new(30.0, 59.0)),
            centroid: Coordinates::new(30.0, 59.0),
            territories: Territories::default(),
        }
    }

    #[tokio::test]
    async fn rollback_discards_writes_since_the_checkpoint() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        store.begin().await.unwrap();

        let kept = store.insert_physical_object(&object(city)).await.unwrap();
        let checkpoint = Checkpoint::acquire(&mut store, "row_1").await.unwrap();
        store.insert_physical_object(&object(city)).await.unwrap();
        checkpoint.rollback(&mut store).await.unwrap();

        let ids: Vec<i64> = store.physical_objects().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![kept]);
        assert!(store.in_transaction());
    }

    #[tokio::test]
    async fn release_keeps_writes() {
        let mut store = MemoryStore::new();
        let city = store.add_city("Saint Petersburg", None);
        store.begin().await.unwrap();

        let checkpoint = Checkpoint::acquire(&mut store, "row_1").await.unwrap();
        assert_eq!(checkpoint.name(), "row_1");
        store.insert_physical_object(&object(city)).await.unwrap();
        checkpoint.release(&mut store).await.unwrap();

        assert_eq!(store.physical_objects().len(), 1);
        // Released savepoints can no longer be rolled back to.
        assert!(store.rollback_to_savepoint("row_1").await.is_err());
    }
}
