use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{CustomerEntity, TableBatch, TableStore};

type Rows = BTreeMap<(String, String), CustomerEntity>;

/// Process-local table store with the service's observable behavior:
/// duplicate inserts conflict, writes assign fresh ETags, replace and delete
/// are conditional, batches are all-or-nothing and queries come back in
/// row-key order.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: Mutex<HashMap<String, Rows>>,
    version: AtomicU64,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.lock().contains_key(table)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Rows>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stamp(&self, entity: &CustomerEntity) -> CustomerEntity {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let mut stored = entity.clone();
        stored.timestamp = Some(Utc::now());
        stored.etag = Some(format!("W/\"{version}\""));
        stored
    }
}

fn key_of(entity: &CustomerEntity) -> (String, String) {
    (entity.partition_key.clone(), entity.row_key.clone())
}

fn table_not_found() -> StorageError {
    StorageError::service(
        404,
        StorageError::TABLE_NOT_FOUND,
        "The table specified does not exist.",
    )
}

fn entity_already_exists() -> StorageError {
    StorageError::service(
        409,
        StorageError::ENTITY_ALREADY_EXISTS,
        "The specified entity already exists.",
    )
}

fn resource_not_found() -> StorageError {
    StorageError::service(
        404,
        StorageError::RESOURCE_NOT_FOUND,
        "The specified resource does not exist.",
    )
}

fn condition_not_satisfied() -> StorageError {
    StorageError::service(
        412,
        StorageError::UPDATE_CONDITION_NOT_SATISFIED,
        "The update condition specified in the request was not satisfied.",
    )
}

/// Checks that `entity` may overwrite or remove the stored row.
fn check_condition(rows: &Rows, entity: &CustomerEntity) -> Result<(), StorageError> {
    let expected = entity.require_etag()?;
    let current = rows.get(&key_of(entity)).ok_or_else(resource_not_found)?;
    if expected != "*" && current.etag.as_deref() != Some(expected) {
        return Err(condition_not_satisfied());
    }
    Ok(())
}

#[async_trait::async_trait]
impl TableStore for InMemoryTableStore {
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StorageError> {
        let mut tables = self.lock();
        if tables.contains_key(table) {
            debug!(table, "Table already exists");
            return Ok(false);
        }
        tables.insert(table.to_string(), Rows::new());
        debug!(table, "Created table");
        Ok(true)
    }

    async fn insert(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        entity.validate_keys()?;
        let stored = self.stamp(entity);

        let mut tables = self.lock();
        let rows = tables.get_mut(table).ok_or_else(table_not_found)?;
        if rows.contains_key(&key_of(entity)) {
            return Err(entity_already_exists());
        }
        rows.insert(key_of(entity), stored);
        debug!(table, row_key = %entity.row_key, "Inserted entity");
        Ok(())
    }

    async fn execute_batch(&self, table: &str, batch: &TableBatch) -> Result<(), StorageError> {
        batch.validate()?;

        let mut tables = self.lock();
        let rows = tables.get_mut(table).ok_or_else(table_not_found)?;
        if batch
            .inserts()
            .iter()
            .any(|entity| rows.contains_key(&key_of(entity)))
        {
            return Err(entity_already_exists());
        }
        for entity in batch.inserts() {
            rows.insert(key_of(entity), self.stamp(entity));
        }
        debug!(table, operations = batch.len(), "Committed batch");
        Ok(())
    }

    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<CustomerEntity>, StorageError> {
        let tables = self.lock();
        let rows = tables.get(table).ok_or_else(table_not_found)?;
        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<CustomerEntity>, StorageError> {
        let tables = self.lock();
        let rows = tables.get(table).ok_or_else(table_not_found)?;
        Ok(rows
            .values()
            .filter(|entity| entity.partition_key == partition_key)
            .cloned()
            .collect())
    }

    async fn replace(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        let stored = self.stamp(entity);

        let mut tables = self.lock();
        let rows = tables.get_mut(table).ok_or_else(table_not_found)?;
        check_condition(rows, entity)?;
        rows.insert(key_of(entity), stored);
        debug!(table, row_key = %entity.row_key, "Replaced entity");
        Ok(())
    }

    async fn delete(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let rows = tables.get_mut(table).ok_or_else(table_not_found)?;
        check_condition(rows, entity)?;
        rows.remove(&key_of(entity));
        debug!(table, row_key = %entity.row_key, "Deleted entity");
        Ok(())
    }
}
