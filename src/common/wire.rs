//! HTTP wire messages shared by clients and routers

use crate::common::{Error, ErrorBody, ObjectId, Payload, Result, ServerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Service name the coordinator answers on `GET /service`
pub const COORDINATOR_SERVICE: &str = "minidsm.coordinator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatedId {
    pub id: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub id: ObjectId,
    pub payload: Payload,
    pub caller: ServerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRequest {
    pub name: String,
    pub caller: ServerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRequest {
    pub caller: ServerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadBody {
    pub payload: Payload,
}

/// One row of `GET /admin/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub id: ObjectId,
    pub name: Option<String>,
    pub writer: Option<ServerId>,
    pub readers: Vec<ServerId>,
    pub servers: Vec<ServerId>,
    pub epoch: u64,
    pub payload_len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub next_id: ObjectId,
    pub objects: Vec<ObjectStatus>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// Decode a JSON response, turning error bodies back into typed errors.
pub async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }
    Err(decode_error(status, resp).await)
}

/// Like [`decode`] for endpoints without a response body.
pub async fn expect_ok(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    Err(decode_error(status, resp).await)
}

async fn decode_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let text = match resp.text().await {
        Ok(text) => text,
        Err(e) => return e.into(),
    };
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Error::from_body(body),
        Err(_) => Error::TransportFailure(format!("HTTP {}: {}", status, text)),
    }
}
