//! Error types for minidsm

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Protocol Errors ===
    #[error("Name conflict: '{name}' is already bound to object {existing}")]
    NameConflict { name: String, existing: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Stale reference: {0}")]
    StaleReference(String),

    // === Network Errors ===
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Persistence Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable discriminant of [`Error`], used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NameConflict,
    NotFound,
    InvalidArgument,
    StaleReference,
    TransportFailure,
    Timeout,
    Internal,
}

/// Error body returned by every minidsm HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<u64>,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NameConflict { .. } => ErrorKind::NameConflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::StaleReference(_) => ErrorKind::StaleReference,
            Error::TransportFailure(_) => ErrorKind::TransportFailure,
            Error::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// Did this error come from an unreachable or unresponsive peer?
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::TransportFailure(_) | Error::Timeout(_))
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NameConflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::StaleReference => StatusCode::GONE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::TransportFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (name, existing) = match self {
            Error::NameConflict { name, existing } => (Some(name.clone()), Some(*existing)),
            _ => (None, None),
        };
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            name,
            existing,
        }
    }

    /// Rebuild a typed error from a wire body.
    pub fn from_body(body: ErrorBody) -> Self {
        match body.kind {
            ErrorKind::NameConflict => Error::NameConflict {
                name: body.name.unwrap_or_default(),
                existing: body.existing.unwrap_or_default(),
            },
            ErrorKind::NotFound => Error::NotFound(body.message),
            ErrorKind::InvalidArgument => Error::InvalidArgument(body.message),
            ErrorKind::StaleReference => Error::StaleReference(body.message),
            ErrorKind::TransportFailure => Error::TransportFailure(body.message),
            ErrorKind::Timeout => Error::Timeout(body.message),
            ErrorKind::Internal => Error::Internal(body.message),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::warn!("request failed: {}", self);
        }
        (status, axum::Json(self.to_body())).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::TransportFailure(e.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Corrupted(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}
