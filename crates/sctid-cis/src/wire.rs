//! JSON bodies exchanged with the authority.

use serde::{Deserialize, Deserializer, Serialize};

/// Job status at or above which a job is finished.
pub(crate) const STATUS_SUCCESS: i64 = 2;
/// Job status of a failed job.
pub(crate) const STATUS_FAIL: i64 = 3;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReserveRequest<'a> {
    pub namespace: u32,
    pub partition_id: String,
    pub quantity: usize,
    pub software: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub namespace: u32,
    pub ids: &'a [u64],
}

#[derive(Debug, Serialize)]
pub(crate) struct BulkIdsRequest {
    /// Comma separated identifiers.
    pub sctids: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthenticateRequest<'a> {
    pub token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobCreated {
    #[serde(deserialize_with = "number_or_string")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobStatus {
    #[serde(deserialize_with = "numeric_status")]
    pub status: i64,
    #[serde(default)]
    pub log: Option<String>,
}

/// One identifier as reported by the authority.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Record {
    #[serde(deserialize_with = "number_or_string")]
    pub sctid: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::String(s) => s,
    })
}

fn numeric_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("non numeric job status {s:?}"))),
    }
}
