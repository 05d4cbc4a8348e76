// people-tables - Azure Table storage walkthrough
// Exposes the workflow and storage layers for the binary and for testing

pub mod config;
pub mod error;
pub mod storage;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::{PeopleTablesConfig, StorageBackend};
pub use error::StorageError;
pub use storage::{
    AzureTableStore, CustomerEntity, InMemoryTableStore, StorageAccount, TableBatch, TableStore,
};
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry};
pub use workflow::{open_store, run_tutorial, sample_customers, PeopleWorkflow, WorkflowError};
