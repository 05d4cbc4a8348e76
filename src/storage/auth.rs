// Shared Key Lite request signing for the Table service

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use crate::error::StorageError;
use crate::storage::account::StorageAccount;

type HmacSha256 = Hmac<Sha256>;

/// `x-ms-date` value: RFC 1123 in GMT.
pub fn format_request_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `/{account}{path}`, plus `?comp=` when the request carries one.
pub fn canonicalized_resource(account: &StorageAccount, url: &Url) -> String {
    let mut resource = format!("/{}{}", account.name(), url.path());
    if let Some((_, comp)) = url.query_pairs().find(|(k, _)| k == "comp") {
        resource.push_str("?comp=");
        resource.push_str(&comp);
    }
    resource
}

/// `Authorization` header value for a table request.
///
/// The string to sign is the request date and the canonicalized resource,
/// separated by a newline.
pub fn shared_key_lite(
    account: &StorageAccount,
    request_date: &str,
    url: &Url,
) -> Result<String, StorageError> {
    let string_to_sign = format!("{request_date}\n{}", canonicalized_resource(account, url));

    let mut mac = HmacSha256::new_from_slice(account.key())
        .map_err(|e| StorageError::InvalidConnectionString(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!("SharedKeyLite {}:{signature}", account.name()))
}
