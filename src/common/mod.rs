//! Common utilities and types shared across minidsm

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod types;
pub mod utils;
pub mod wire;

pub use config::{CallbackFailurePolicy, Config, CoordinatorConfig, NodeConfig, RestoreMode};
pub use error::{Error, ErrorBody, ErrorKind, Result};
pub use metrics::ProtocolMetrics;
pub use types::{Grant, Invalidation, LockGrade, ObjectId, ObjectRef, Payload, ServerId};
pub use utils::{format_bytes, http_url, validate_name};
