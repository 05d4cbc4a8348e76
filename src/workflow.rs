//! The tutorial itself: a fixed walk through create, read, update and delete
//! against one table partition, reported on a console.

use std::io::Write;
use thiserror::Error;
use tracing::{info, Instrument};

use crate::config::{PeopleTablesConfig, StorageBackend, StorageConfig};
use crate::error::StorageError;
use crate::storage::{AzureTableStore, CustomerEntity, InMemoryTableStore, TableBatch, TableStore};
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Ben's number after the update step.
pub const UPDATED_PHONE_NUMBER: &str = "425-555-0105";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to write console output: {0}")]
    Console(#[from] std::io::Error),
}

/// Walter, Jeff and Ben, in the order the tutorial inserts them.
pub fn sample_customers(partition: &str) -> Vec<CustomerEntity> {
    [
        ("Walter", "425-555-0101"),
        ("Jeff", "425-555-0104"),
        ("Ben", "425-555-0102"),
    ]
    .into_iter()
    .map(|(name, phone)| {
        CustomerEntity::new(partition, name)
            .with_email(format!("{name}@contoso.com"))
            .with_phone_number(phone)
    })
    .collect()
}

/// Open the backend named by the configuration.
///
/// A missing or malformed connection string is a storage failure, reported
/// the same way as any other.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn TableStore>, StorageError> {
    match config.backend {
        StorageBackend::Memory => Ok(Box::new(InMemoryTableStore::new())),
        StorageBackend::Azure => {
            let connection_string = config.resolve_connection_string().ok_or_else(|| {
                StorageError::InvalidConnectionString(format!(
                    "no connection string found; set '{}'",
                    config.connection_string_setting
                ))
            })?;
            Ok(Box::new(AzureTableStore::from_connection_string(
                &connection_string,
                config.request_timeout(),
            )?))
        }
    }
}

/// Open the configured store and run every step, writing to `out`.
pub async fn run_tutorial<W: Write>(
    config: &PeopleTablesConfig,
    out: W,
) -> Result<(), WorkflowError> {
    let correlation_id = generate_correlation_id();
    let span = create_workflow_span(&config.table.name, &config.table.partition, &correlation_id);

    async {
        let store = open_store(&config.storage)?;
        let mut workflow =
            PeopleWorkflow::new(store.as_ref(), &config.table.name, &config.table.partition, out);
        workflow.run().await
    }
    .instrument(span)
    .await
}

/// Runs the tutorial steps against one table and partition.
pub struct PeopleWorkflow<'a, S: TableStore + ?Sized, W: Write> {
    store: &'a S,
    table: &'a str,
    partition: &'a str,
    out: W,
}

impl<'a, S: TableStore + ?Sized, W: Write> PeopleWorkflow<'a, S, W> {
    pub fn new(store: &'a S, table: &'a str, partition: &'a str, out: W) -> Self {
        Self {
            store,
            table,
            partition,
            out,
        }
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// The whole sequence. The first failure abandons the remaining steps;
    /// completed steps are not rolled back.
    pub async fn run(&mut self) -> Result<(), WorkflowError> {
        self.ensure_table().await?;

        let mut customers = sample_customers(self.partition).into_iter();
        if let Some(walter) = customers.next() {
            self.insert_customer(&walter).await?;
        }
        let rest: Vec<_> = customers.collect();
        self.insert_customers(&rest).await?;

        self.print_partition().await?;
        self.print_phone_number("Ben").await?;

        self.update_phone_number("Ben", UPDATED_PHONE_NUMBER).await?;
        self.delete_customer("Walter").await?;
        writeln!(self.out)?;

        self.print_partition().await?;
        self.print_phone_number("Ben").await?;

        info!("Tutorial finished");
        Ok(())
    }

    pub async fn ensure_table(&mut self) -> Result<bool, WorkflowError> {
        let created = self.store.create_table_if_not_exists(self.table).await?;
        info!(created, "Table ready");
        Ok(created)
    }

    /// Fails if a row with the same name is already there; the table has
    /// to be deleted before the tutorial can run again.
    pub async fn insert_customer(&mut self, customer: &CustomerEntity) -> Result<(), WorkflowError> {
        self.store.insert(self.table, customer).await?;
        info!(row_key = %customer.row_key, "Inserted customer");
        Ok(())
    }

    pub async fn insert_customers(&mut self, customers: &[CustomerEntity]) -> Result<(), WorkflowError> {
        let mut batch = TableBatch::new();
        for customer in customers {
            batch.insert(customer.clone())?;
        }
        self.store.execute_batch(self.table, &batch).await?;
        info!(count = batch.len(), "Inserted customers in one batch");
        Ok(())
    }

    /// Prints every row in the partition followed by a blank line.
    pub async fn print_partition(&mut self) -> Result<Vec<CustomerEntity>, WorkflowError> {
        let customers = self
            .store
            .query_partition(self.table, self.partition)
            .await?;

        for customer in &customers {
            writeln!(self.out, "{}", customer.display_row())?;
        }
        writeln!(self.out)?;

        info!(rows = customers.len(), "Listed partition");
        Ok(customers)
    }

    pub async fn print_phone_number(&mut self, name: &str) -> Result<Option<String>, WorkflowError> {
        match self.store.retrieve(self.table, self.partition, name).await? {
            Some(customer) => {
                writeln!(self.out, "{name}'s phone number: {}", customer.phone_number)?;
                Ok(Some(customer.phone_number))
            }
            None => {
                writeln!(self.out, "{name}'s phone number could not be retrieved.")?;
                Ok(None)
            }
        }
    }

    /// Retrieve, change the phone number and replace with the retrieved
    /// ETag. Returns `false` if the row was not there.
    pub async fn update_phone_number(
        &mut self,
        name: &str,
        phone_number: &str,
    ) -> Result<bool, WorkflowError> {
        let Some(mut customer) = self.store.retrieve(self.table, self.partition, name).await? else {
            writeln!(self.out, "Entity could not be retrieved.")?;
            return Ok(false);
        };

        customer.phone_number = phone_number.to_string();
        self.store.replace(self.table, &customer).await?;
        writeln!(self.out, "{name}'s phone number updated.")?;

        info!(row_key = name, "Updated phone number");
        Ok(true)
    }

    /// Retrieve, then delete conditional on the retrieved ETag. Returns
    /// `false` if the row was not there.
    pub async fn delete_customer(&mut self, name: &str) -> Result<bool, WorkflowError> {
        let Some(customer) = self.store.retrieve(self.table, self.partition, name).await? else {
            writeln!(self.out, "Could not retrieve the entity.")?;
            return Ok(false);
        };

        self.store.delete(self.table, &customer).await?;
        writeln!(self.out, "{name}'s entity deleted.")?;

        info!(row_key = name, "Deleted customer");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockTableStore;
    use mockall::predicate::eq;

    const TABLE: &str = "people";
    const PARTITION: &str = "My_Peoples_Partition";

    fn output(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    fn ben_with_etag() -> CustomerEntity {
        let mut ben = sample_customers(PARTITION).remove(2);
        ben.etag = Some("W/\"7\"".to_string());
        ben
    }

    #[test]
    fn sample_customers_match_the_tutorial() {
        let customers = sample_customers(PARTITION);
        let names: Vec<_> = customers.iter().map(|c| c.row_key.as_str()).collect();

        assert_eq!(names, vec!["Walter", "Jeff", "Ben"]);
        assert_eq!(customers[0].email, "Walter@contoso.com");
        assert_eq!(customers[1].phone_number, "425-555-0104");
        assert_eq!(customers[2].phone_number, "425-555-0102");
        assert!(customers.iter().all(|c| c.partition_key == PARTITION));
    }

    #[tokio::test]
    async fn missing_row_prints_the_not_found_line() {
        let mut store = MockTableStore::new();
        store
            .expect_retrieve()
            .with(eq(TABLE), eq(PARTITION), eq("Ben"))
            .returning(|_, _, _| Ok(None));

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        let phone = workflow.print_phone_number("Ben").await.unwrap();

        assert!(phone.is_none());
        assert_eq!(
            output(workflow.into_output()),
            "Ben's phone number could not be retrieved.\n"
        );
    }

    #[tokio::test]
    async fn update_replaces_with_the_retrieved_etag() {
        let mut store = MockTableStore::new();
        store
            .expect_retrieve()
            .returning(|_, _, _| Ok(Some(ben_with_etag())));
        store
            .expect_replace()
            .withf(|table, entity| {
                table == TABLE
                    && entity.phone_number == UPDATED_PHONE_NUMBER
                    && entity.email == "Ben@contoso.com"
                    && entity.etag.as_deref() == Some("W/\"7\"")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        assert!(workflow.update_phone_number("Ben", UPDATED_PHONE_NUMBER).await.unwrap());

        assert_eq!(output(workflow.into_output()), "Ben's phone number updated.\n");
    }

    #[tokio::test]
    async fn update_of_a_missing_row_skips_the_replace() {
        let mut store = MockTableStore::new();
        store.expect_retrieve().returning(|_, _, _| Ok(None));
        store.expect_replace().never();

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        assert!(!workflow.update_phone_number("Ben", UPDATED_PHONE_NUMBER).await.unwrap());

        assert_eq!(output(workflow.into_output()), "Entity could not be retrieved.\n");
    }

    #[tokio::test]
    async fn delete_of_a_missing_row_skips_the_delete() {
        let mut store = MockTableStore::new();
        store.expect_retrieve().returning(|_, _, _| Ok(None));
        store.expect_delete().never();

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        assert!(!workflow.delete_customer("Walter").await.unwrap());

        assert_eq!(output(workflow.into_output()), "Could not retrieve the entity.\n");
    }

    #[tokio::test]
    async fn duplicate_insert_aborts_the_remaining_steps() {
        let mut store = MockTableStore::new();
        store
            .expect_create_table_if_not_exists()
            .returning(|_| Ok(false));
        store.expect_insert().times(1).returning(|_, _| {
            Err(StorageError::service(
                409,
                StorageError::ENTITY_ALREADY_EXISTS,
                "The specified entity already exists.",
            ))
        });
        store.expect_execute_batch().never();
        store.expect_query_partition().never();
        store.expect_retrieve().never();

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        let err = workflow.run().await.unwrap_err();

        match err {
            WorkflowError::Storage(err) => {
                assert_eq!(err.code(), Some(StorageError::ENTITY_ALREADY_EXISTS))
            }
            other => panic!("expected a storage failure, got {other:?}"),
        }
        assert!(workflow.into_output().is_empty());
    }

    #[tokio::test]
    async fn batch_failure_after_insert_is_not_rolled_back() {
        let mut store = MockTableStore::new();
        store
            .expect_create_table_if_not_exists()
            .returning(|_| Ok(true));
        store
            .expect_insert()
            .withf(|_, entity| entity.row_key == "Walter")
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_execute_batch()
            .withf(|_, batch| batch.len() == 2)
            .returning(|_, _| Err(StorageError::service(503, "ServerBusy", "The server is busy.")));
        store.expect_delete().never();

        let mut workflow = PeopleWorkflow::new(&store, TABLE, PARTITION, Vec::new());
        let err = workflow.run().await.unwrap_err();

        assert_eq!(err.to_string(), "The server is busy.");
    }

    #[test]
    fn memory_backend_needs_no_connection_string() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };

        assert!(open_store(&config).is_ok());
    }

    #[test]
    fn azure_backend_rejects_a_malformed_connection_string() {
        let config = StorageConfig {
            connection_string: Some("AccountName=contoso".to_string()),
            ..StorageConfig::default()
        };

        let err = open_store(&config).err().unwrap();

        assert!(matches!(err, StorageError::InvalidConnectionString(_)));
    }
}
