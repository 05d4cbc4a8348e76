use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Largest key the table service accepts, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// A customer row: first name as row key, one shared partition.
///
/// Property names on the wire follow the table service's casing. `timestamp`
/// and `etag` are assigned by the store and never sent back on writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerEntity {
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "RowKey")]
    pub row_key: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "PhoneNumber", default)]
    pub phone_number: String,
    #[serde(rename = "Timestamp", default, skip_serializing)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "odata.etag", default, skip_serializing)]
    pub etag: Option<String>,
}

impl CustomerEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            email: String::new(),
            phone_number: String::new(),
            timestamp: None,
            etag: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = phone_number.into();
        self
    }

    /// Identity of the row within its table.
    pub fn key(&self) -> (&str, &str) {
        (&self.partition_key, &self.row_key)
    }

    /// Concurrency token, required by conditional replace and delete.
    pub fn require_etag(&self) -> Result<&str, StorageError> {
        self.etag
            .as_deref()
            .ok_or_else(|| StorageError::MissingETag {
                partition_key: self.partition_key.clone(),
                row_key: self.row_key.clone(),
            })
    }

    /// Rejects keys the service would refuse, before any request goes out.
    pub fn validate_keys(&self) -> Result<(), StorageError> {
        validate_key(&self.partition_key)?;
        validate_key(&self.row_key)
    }

    /// Console line: `partition; row; email; phone`.
    pub fn display_row(&self) -> String {
        format!(
            "{}; {}; {}; {}",
            self.partition_key, self.row_key, self.email, self.phone_number
        )
    }
}

pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if key.len() > MAX_KEY_BYTES {
        return Err(invalid("keys are limited to 1 KiB"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
    {
        return Err(invalid(&format!("character {c:?} is not allowed in keys")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_service_property_names() {
        let entity = CustomerEntity::new("My_Peoples_Partition", "Walter")
            .with_email("Walter@contoso.com")
            .with_phone_number("425-555-0101");

        let value = serde_json::to_value(&entity).unwrap();

        assert_eq!(
            value,
            json!({
                "PartitionKey": "My_Peoples_Partition",
                "RowKey": "Walter",
                "Email": "Walter@contoso.com",
                "PhoneNumber": "425-555-0101",
            })
        );
    }

    #[test]
    fn deserializes_server_assigned_fields() {
        let entity: CustomerEntity = serde_json::from_value(json!({
            "odata.etag": "W/\"datetime'2024-03-01T10%3A00%3A00.1234567Z'\"",
            "PartitionKey": "My_Peoples_Partition",
            "RowKey": "Ben",
            "Timestamp": "2024-03-01T10:00:00.1234567Z",
            "Email": "Ben@contoso.com",
            "PhoneNumber": "425-555-0102"
        }))
        .unwrap();

        assert_eq!(entity.phone_number, "425-555-0102");
        assert!(entity.timestamp.is_some());
        assert!(entity.require_etag().is_ok());
    }

    #[test]
    fn missing_etag_is_reported_with_the_key() {
        let entity = CustomerEntity::new("p", "Ben");

        let err = entity.require_etag().unwrap_err();

        assert!(matches!(err, StorageError::MissingETag { ref row_key, .. } if row_key == "Ben"));
    }

    #[test]
    fn display_row_uses_semicolon_separators() {
        let entity = CustomerEntity::new("My_Peoples_Partition", "Jeff")
            .with_email("Jeff@contoso.com")
            .with_phone_number("425-555-0104");

        assert_eq!(
            entity.display_row(),
            "My_Peoples_Partition; Jeff; Jeff@contoso.com; 425-555-0104"
        );
    }

    #[test]
    fn rejects_forbidden_key_characters() {
        assert!(validate_key("Walter").is_ok());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a#b").is_err());
        assert!(validate_key("tab\there").is_err());
        assert!(validate_key(&"x".repeat(MAX_KEY_BYTES + 1)).is_err());
    }
}
