pub mod account;
pub mod auth;
pub mod azure;
pub mod batch;
pub mod entity;
pub mod memory;

pub use account::StorageAccount;
pub use azure::AzureTableStore;
pub use batch::TableBatch;
pub use entity::CustomerEntity;
pub use memory::InMemoryTableStore;

use crate::error::StorageError;

#[cfg(test)]
use mockall::automock;

/// Operations the tutorial needs from a table-storage backend.
///
/// Every call completes before it returns; callers never have more than one
/// request in flight. Optimistic concurrency is the backend's job: replace
/// and delete carry the ETag of the entity they were given and fail with a
/// precondition error if the stored row has changed since.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait TableStore: Send + Sync {
    /// Create `table` unless it already exists. Returns `true` if it was created.
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StorageError>;

    /// Insert a new row. Fails with `EntityAlreadyExists` if the key is taken.
    async fn insert(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError>;

    /// Apply every insert in `batch` atomically, or none of them.
    async fn execute_batch(&self, table: &str, batch: &TableBatch) -> Result<(), StorageError>;

    /// Point lookup. A missing row is `Ok(None)`, not an error.
    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<CustomerEntity>, StorageError>;

    /// Every row in one partition.
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<CustomerEntity>, StorageError>;

    /// Overwrite a row, conditional on the entity's ETag.
    async fn replace(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError>;

    /// Remove a row, conditional on the entity's ETag.
    async fn delete(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError>;
}
