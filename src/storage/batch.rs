use std::collections::HashSet;

use crate::error::StorageError;
use crate::storage::entity::CustomerEntity;

/// Most operations the table service accepts in one change set.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// An atomic group of inserts into a single partition.
///
/// The store applies every insert or none of them. The constraints the service
/// enforces are checked here as entities are added, so an invalid batch is
/// rejected before a request is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableBatch {
    inserts: Vec<CustomerEntity>,
}

impl TableBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: CustomerEntity) -> Result<&mut Self, StorageError> {
        entity.validate_keys()?;

        if self.inserts.len() >= MAX_BATCH_OPERATIONS {
            return Err(StorageError::InvalidBatch(format!(
                "a batch holds at most {MAX_BATCH_OPERATIONS} operations"
            )));
        }
        if let Some(partition) = self.partition_key() {
            if partition != entity.partition_key {
                return Err(StorageError::InvalidBatch(format!(
                    "all entities must share partition '{partition}', got '{}'",
                    entity.partition_key
                )));
            }
        }
        if self.inserts.iter().any(|e| e.row_key == entity.row_key) {
            return Err(StorageError::InvalidBatch(format!(
                "row key '{}' appears more than once",
                entity.row_key
            )));
        }

        self.inserts.push(entity);
        Ok(self)
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.inserts.first().map(|e| e.partition_key.as_str())
    }

    pub fn inserts(&self) -> &[CustomerEntity] {
        &self.inserts
    }

    pub fn len(&self) -> usize {
        self.inserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
    }

    /// Checks the invariants again for batches assembled elsewhere.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.inserts.is_empty() {
            return Err(StorageError::InvalidBatch(
                "a batch needs at least one operation".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entity in &self.inserts {
            if Some(entity.partition_key.as_str()) != self.partition_key() {
                return Err(StorageError::InvalidBatch(
                    "all entities must share one partition".to_string(),
                ));
            }
            if !seen.insert(entity.row_key.as_str()) {
                return Err(StorageError::InvalidBatch(format!(
                    "row key '{}' appears more than once",
                    entity.row_key
                )));
            }
        }
        Ok(())
    }
}
