// Storage account settings parsed from an Azure-style connection string

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;

use crate::error::StorageError;

/// Account name the local storage emulator runs under.
pub const DEVELOPMENT_ACCOUNT_NAME: &str = "devstoreaccount1";

/// Published emulator key. Not a secret.
pub const DEVELOPMENT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const DEVELOPMENT_PROXY: &str = "http://127.0.0.1";
const DEVELOPMENT_TABLE_PORT: u16 = 10002;

/// Credentials and table endpoint for one storage account.
#[derive(Clone)]
pub struct StorageAccount {
    name: String,
    key: Vec<u8>,
    table_endpoint: String,
}

impl std::fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAccount")
            .field("name", &self.name)
            .field("key", &"[REDACTED]")
            .field("table_endpoint", &self.table_endpoint)
            .finish()
    }
}

impl StorageAccount {
    /// Parse a connection string such as
    /// `DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=...;EndpointSuffix=core.windows.net`
    /// or `UseDevelopmentStorage=true`.
    pub fn parse(connection_string: &str) -> Result<Self, StorageError> {
        let settings = parse_settings(connection_string)?;

        if settings
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            let proxy = settings
                .get("developmentstorageproxyuri")
                .map(|uri| uri.trim_end_matches('/'))
                .unwrap_or(DEVELOPMENT_PROXY);
            return Self::new(
                DEVELOPMENT_ACCOUNT_NAME,
                DEVELOPMENT_ACCOUNT_KEY,
                format!("{proxy}:{DEVELOPMENT_TABLE_PORT}/{DEVELOPMENT_ACCOUNT_NAME}"),
            );
        }

        let name = settings
            .get("accountname")
            .copied()
            .ok_or_else(|| missing("AccountName"))?;
        let key = settings
            .get("accountkey")
            .copied()
            .ok_or_else(|| missing("AccountKey"))?;

        let endpoint = match settings.get("tableendpoint") {
            Some(endpoint) => endpoint.to_string(),
            None => {
                let protocol = settings
                    .get("defaultendpointsprotocol")
                    .copied()
                    .unwrap_or("https");
                let suffix = settings
                    .get("endpointsuffix")
                    .copied()
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{name}.table.{suffix}")
            }
        };

        Self::new(name, key, endpoint)
    }

    pub fn new(
        name: impl Into<String>,
        base64_key: &str,
        table_endpoint: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let key = STANDARD.decode(base64_key.trim()).map_err(|e| {
            StorageError::InvalidConnectionString(format!("AccountKey is not valid base64: {e}"))
        })?;
        let table_endpoint = table_endpoint.into().trim_end_matches('/').to_string();

        reqwest::Url::parse(&table_endpoint).map_err(|e| {
            StorageError::InvalidConnectionString(format!(
                "table endpoint '{table_endpoint}' is not a valid URL: {e}"
            ))
        })?;

        Ok(Self {
            name: name.into(),
            key,
            table_endpoint,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Base URL for table requests, without a trailing slash.
    pub fn table_endpoint(&self) -> &str {
        &self.table_endpoint
    }
}

fn missing(setting: &str) -> StorageError {
    StorageError::InvalidConnectionString(format!("{setting} is required"))
}

/// Setting names are case-insensitive; values keep their case and may contain `=`.
fn parse_settings(connection_string: &str) -> Result<HashMap<String, &str>, StorageError> {
    let mut settings = HashMap::new();

    for segment in connection_string.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment.split_once('=').ok_or_else(|| {
            StorageError::InvalidConnectionString(format!("'{segment}' is not a Key=Value pair"))
        })?;
        settings.insert(name.trim().to_ascii_lowercase(), value.trim());
    }

    if settings.is_empty() {
        return Err(StorageError::InvalidConnectionString(
            "connection string is empty".to_string(),
        ));
    }
    Ok(settings)
}
