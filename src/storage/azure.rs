//! Azure Table service client.
//!
//! Talks to the Table REST API directly: JSON payloads with minimal OData
//! metadata, Shared Key Lite authentication and `multipart/mixed` change sets
//! for batches. Works against storage accounts and the local emulator alike.

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::auth::{format_request_date, shared_key_lite};
use crate::storage::{CustomerEntity, StorageAccount, TableBatch, TableStore};

const API_VERSION: &str = "2019-02-02";
const DATA_SERVICE_VERSION: &str = "3.0";
const JSON_MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";
const RETURN_NO_CONTENT: &str = "return-no-content";

const NEXT_PARTITION_KEY: &str = "x-ms-continuation-NextPartitionKey";
const NEXT_ROW_KEY: &str = "x-ms-continuation-NextRowKey";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Key and filter literals: everything but unreserved characters is escaped.
const LITERAL: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone)]
pub struct AzureTableStore {
    http: Client,
    account: StorageAccount,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(rename = "odata.error")]
    error: ODataError,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    code: String,
    message: ODataMessage,
}

#[derive(Debug, Deserialize)]
struct ODataMessage {
    value: String,
}

#[derive(Debug, Deserialize)]
struct QueryPage {
    #[serde(default)]
    value: Vec<CustomerEntity>,
}

impl AzureTableStore {
    pub fn new(account: StorageAccount) -> Result<Self, StorageError> {
        Self::with_timeout(account, None)
    }

    /// Build a client whose requests give up after `timeout`. `None` keeps
    /// the HTTP client's defaults.
    pub fn with_timeout(
        account: StorageAccount,
        timeout: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let mut builder =
            Client::builder().user_agent(concat!("people-tables/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        debug!(
            account = account.name(),
            endpoint = account.table_endpoint(),
            "Created table service client"
        );

        Ok(Self {
            http: builder.build()?,
            account,
        })
    }

    pub fn from_connection_string(
        connection_string: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, StorageError> {
        Self::with_timeout(StorageAccount::parse(connection_string)?, timeout)
    }

    pub fn account(&self) -> &StorageAccount {
        &self.account
    }

    fn url(&self, path: &str) -> Result<Url, StorageError> {
        let raw = format!("{}/{path}", self.account.table_endpoint());
        Url::parse(&raw).map_err(|e| {
            StorageError::InvalidConnectionString(format!("cannot build request URL '{raw}': {e}"))
        })
    }

    fn entity_url(&self, table: &str, partition_key: &str, row_key: &str) -> Result<Url, StorageError> {
        self.url(&format!(
            "{table}(PartitionKey='{}',RowKey='{}')",
            key_literal(partition_key),
            key_literal(row_key)
        ))
    }

    /// Signed request with the headers every table call carries.
    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let date = format_request_date(Utc::now());
        let authorization = shared_key_lite(&self.account, &date, &url)?;

        Ok(self
            .http
            .request(method, url)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", "3.0;NetFx")
            .header("x-ms-client-request-id", Uuid::new_v4().to_string())
            .header(ACCEPT, JSON_MINIMAL_METADATA)
            .header(AUTHORIZATION, authorization))
    }
}

fn key_literal(key: &str) -> String {
    utf8_percent_encode(&key.replace('\'', "''"), LITERAL).to_string()
}

/// OData filter selecting one partition, quotes doubled.
pub fn partition_filter(partition_key: &str) -> String {
    format!("PartitionKey eq '{}'", partition_key.replace('\'', "''"))
}

/// The service appends request ids and timestamps on later lines; the first
/// line is the part meant for people.
fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

fn service_error(status: u16, reason: &str, header_code: Option<String>, body: &str) -> StorageError {
    match serde_json::from_str::<ODataErrorBody>(body.trim()) {
        Ok(ODataErrorBody { error }) => {
            StorageError::service(status, error.code, first_line(&error.message.value))
        }
        Err(_) => StorageError::service(
            status,
            header_code.unwrap_or_else(|| reason.to_string()),
            format!("The remote server returned an error: ({status}) {reason}."),
        ),
    }
}

/// Pass successful responses through; decode failures into [`StorageError`].
async fn check(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header_code = response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let err = service_error(
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        header_code,
        &body,
    );
    debug!(status = status.as_u16(), code = ?err.code(), "Table service returned an error");
    Err(err)
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Serialized `multipart/mixed` body holding one change set of inserts.
fn batch_body(
    endpoint: &str,
    table: &str,
    batch: &TableBatch,
    batch_boundary: &str,
    changeset_boundary: &str,
) -> Result<String, StorageError> {
    let mut body = String::new();
    body.push_str(&format!("--{batch_boundary}\r\n"));
    body.push_str(&format!(
        "Content-Type: multipart/mixed; boundary={changeset_boundary}\r\n\r\n"
    ));

    for entity in batch.inserts() {
        let payload = serde_json::to_string(entity)?;
        body.push_str(&format!("--{changeset_boundary}\r\n"));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str("Content-Transfer-Encoding: binary\r\n\r\n");
        body.push_str(&format!("POST {endpoint}/{table} HTTP/1.1\r\n"));
        body.push_str("Content-Type: application/json\r\n");
        body.push_str(&format!("Accept: {JSON_MINIMAL_METADATA}\r\n"));
        body.push_str(&format!("Prefer: {RETURN_NO_CONTENT}\r\n"));
        body.push_str(&format!("DataServiceVersion: {DATA_SERVICE_VERSION}\r\n\r\n"));
        body.push_str(&payload);
        body.push_str("\r\n");
    }

    body.push_str(&format!("--{changeset_boundary}--\r\n\r\n"));
    body.push_str(&format!("--{batch_boundary}--\r\n"));
    Ok(body)
}

/// A change set either succeeds as a whole or answers with the single
/// operation that failed.
fn batch_failure(body: &str) -> Option<StorageError> {
    let mut lines = body.lines();
    while let Some(line) = lines.next() {
        let Some(status_line) = line.trim().strip_prefix("HTTP/1.1 ") else {
            continue;
        };
        let (code, reason) = status_line.split_once(' ').unwrap_or((status_line, ""));
        let Ok(status) = code.parse::<u16>() else {
            continue;
        };
        if (200..300).contains(&status) {
            continue;
        }

        let payload = lines
            .by_ref()
            .skip_while(|l| !l.trim_start().starts_with('{'))
            .take_while(|l| !l.starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        return Some(service_error(status, reason.trim(), None, &payload));
    }
    None
}

#[async_trait::async_trait]
impl TableStore for AzureTableStore {
    #[instrument(skip(self))]
    async fn create_table_if_not_exists(&self, table: &str) -> Result<bool, StorageError> {
        let response = self
            .request(Method::POST, self.url("Tables")?)?
            .header("Prefer", RETURN_NO_CONTENT)
            .json(&serde_json::json!({ "TableName": table }))
            .send()
            .await?;

        match check(response).await {
            Ok(_) => {
                debug!("Created table");
                Ok(true)
            }
            Err(err) if err.code() == Some(StorageError::TABLE_ALREADY_EXISTS) => {
                debug!("Table already exists");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, entity), fields(row_key = %entity.row_key))]
    async fn insert(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        entity.validate_keys()?;

        let response = self
            .request(Method::POST, self.url(table)?)?
            .header("Prefer", RETURN_NO_CONTENT)
            .json(entity)
            .send()
            .await?;
        check(response).await?;

        debug!("Inserted entity");
        Ok(())
    }

    #[instrument(skip(self, batch), fields(operations = batch.len()))]
    async fn execute_batch(&self, table: &str, batch: &TableBatch) -> Result<(), StorageError> {
        batch.validate()?;

        let batch_boundary = format!("batch_{}", Uuid::new_v4());
        let changeset_boundary = format!("changeset_{}", Uuid::new_v4());
        let body = batch_body(
            self.account.table_endpoint(),
            table,
            batch,
            &batch_boundary,
            &changeset_boundary,
        )?;

        let response = self
            .request(Method::POST, self.url("$batch")?)?
            .header(
                CONTENT_TYPE,
                format!("multipart/mixed; boundary={batch_boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let response = check(response).await?;
        let text = response.text().await?;

        if let Some(err) = batch_failure(&text) {
            warn!(code = ?err.code(), "Batch rejected");
            return Err(err);
        }

        debug!("Committed batch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<CustomerEntity>, StorageError> {
        let response = self
            .request(Method::GET, self.entity_url(table, partition_key, row_key)?)?
            .send()
            .await?;

        let response = match check(response).await {
            Ok(response) => response,
            Err(err)
                if err.status() == Some(StatusCode::NOT_FOUND.as_u16())
                    && err.code() != Some(StorageError::TABLE_NOT_FOUND) =>
            {
                debug!("Entity not found");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let etag = header_value(&response, ETAG.as_str());
        let body = response.text().await?;
        let mut entity: CustomerEntity = serde_json::from_str(&body)?;
        if entity.etag.is_none() {
            entity.etag = etag;
        }

        debug!("Retrieved entity");
        Ok(Some(entity))
    }

    #[instrument(skip(self))]
    async fn query_partition(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<Vec<CustomerEntity>, StorageError> {
        let filter = utf8_percent_encode(&partition_filter(partition_key), LITERAL).to_string();
        let mut continuation: Option<(String, Option<String>)> = None;
        let mut entities = Vec::new();

        loop {
            let mut url = self.url(&format!("{table}()"))?;
            let mut query = format!("$filter={filter}");
            if let Some((next_partition, next_row)) = &continuation {
                query.push_str(&format!(
                    "&NextPartitionKey={}",
                    utf8_percent_encode(next_partition, LITERAL)
                ));
                if let Some(next_row) = next_row {
                    query.push_str(&format!(
                        "&NextRowKey={}",
                        utf8_percent_encode(next_row, LITERAL)
                    ));
                }
            }
            url.set_query(Some(&query));

            let response = check(self.request(Method::GET, url)?.send().await?).await?;
            let next_partition = header_value(&response, NEXT_PARTITION_KEY);
            let next_row = header_value(&response, NEXT_ROW_KEY);

            let body = response.text().await?;
            let page: QueryPage = serde_json::from_str(&body)?;
            debug!(rows = page.value.len(), "Fetched query page");
            entities.extend(page.value);

            match next_partition {
                Some(next_partition) => continuation = Some((next_partition, next_row)),
                None => break,
            }
        }

        Ok(entities)
    }

    #[instrument(skip(self, entity), fields(row_key = %entity.row_key))]
    async fn replace(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        let etag = entity.require_etag()?;

        let response = self
            .request(
                Method::PUT,
                self.entity_url(table, &entity.partition_key, &entity.row_key)?,
            )?
            .header(IF_MATCH, etag)
            .json(entity)
            .send()
            .await?;
        check(response).await?;

        debug!("Replaced entity");
        Ok(())
    }

    #[instrument(skip(self, entity), fields(row_key = %entity.row_key))]
    async fn delete(&self, table: &str, entity: &CustomerEntity) -> Result<(), StorageError> {
        let etag = entity.require_etag()?;

        let response = self
            .request(
                Method::DELETE,
                self.entity_url(table, &entity.partition_key, &entity.row_key)?,
            )?
            .header(IF_MATCH, etag)
            .send()
            .await?;
        check(response).await?;

        debug!("Deleted entity");
        Ok(())
    }
}
