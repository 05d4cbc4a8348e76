use thiserror::Error;

/// Failure raised by any table-storage operation.
///
/// At the workflow level every variant is the same kind of failure: the
/// remaining steps are abandoned and [`StorageError::message`] is shown to the
/// user. The variants exist so callers and tests can tell a duplicate insert
/// from a lost ETag race without parsing strings.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to read entity payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid batch operation: {0}")]
    InvalidBatch(String),

    #[error("Entity ({partition_key}, {row_key}) has no ETag; retrieve it before replacing or deleting")]
    MissingETag {
        partition_key: String,
        row_key: String,
    },
}

impl StorageError {
    pub const ENTITY_ALREADY_EXISTS: &'static str = "EntityAlreadyExists";
    pub const RESOURCE_NOT_FOUND: &'static str = "ResourceNotFound";
    pub const TABLE_NOT_FOUND: &'static str = "TableNotFound";
    pub const TABLE_ALREADY_EXISTS: &'static str = "TableAlreadyExists";
    pub const UPDATE_CONDITION_NOT_SATISFIED: &'static str = "UpdateConditionNotSatisfied";

    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Service {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Human-readable text for the console.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Service error code, when the failure came back from the store.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Service { status, .. } => Some(*status),
            StorageError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.status() == Some(412)
    }
}
