//! Configuration for minidsm components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name (without extension), looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "minidsm";

/// Environment prefix, e.g. `MINIDSM__COORDINATOR__BIND_ADDR`
pub const ENV_PREFIX: &str = "MINIDSM";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Server node config
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load `minidsm.toml` (if present) and `MINIDSM__*` overrides.
    /// Falls back to defaults when nothing can be read.
    pub fn load() -> Self {
        match Self::load_from(DEFAULT_CONFIG_FILE) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable configuration: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Whether the coordinator restores its last snapshot at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Ask the operator on stdin
    #[default]
    Prompt,
    Always,
    Never,
}

/// What the coordinator does when an invalidation callback fails or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CallbackFailurePolicy {
    /// Purge the unreachable node everywhere and carry on with the request
    #[default]
    Prune,
    /// Fail the in-flight request and leave the record table untouched
    Fail,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// Snapshot file written after every mutating call
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    #[serde(default)]
    pub restore: RestoreMode,

    /// Upper bound for a single invalidation callback
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u64,

    /// Upper bound for a liveness probe during recovery
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default)]
    pub on_callback_failure: CallbackFailurePolicy,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1224))
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./coord-data/status.snap")
}
fn default_callback_timeout() -> u64 {
    5_000
}
fn default_probe_timeout() -> u64 {
    1_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            snapshot_path: default_snapshot_path(),
            restore: RestoreMode::default(),
            callback_timeout_ms: default_callback_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            on_callback_failure: CallbackFailurePolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.callback_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "callback_timeout_ms must be > 0".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "probe_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Server node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bind address for the callback endpoints
    #[serde(default = "default_node_bind")]
    pub bind_addr: SocketAddr,

    /// URL the coordinator uses to reach this node; derived from the
    /// bound address when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_url: Option<String>,

    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Upper bound for a request to the coordinator. Must cover the
    /// coordinator's own callback fan-out.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long an invalidation waits for an in-flight grant to be installed
    #[serde(default = "default_grant_wait")]
    pub grant_wait_ms: u64,
}

fn default_node_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}
fn default_coordinator_url() -> String {
    "http://127.0.0.1:1224".to_string()
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_grant_wait() -> u64 {
    2_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_node_bind(),
            advertise_url: None,
            coordinator_url: default_coordinator_url(),
            request_timeout_ms: default_request_timeout(),
            grant_wait_ms: default_grant_wait(),
        }
    }
}

impl NodeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn grant_wait(&self) -> Duration {
        Duration::from_millis(self.grant_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.bind_addr.port(), 1224);
        assert_eq!(config.coordinator.restore, RestoreMode::Prompt);
        assert_eq!(
            config.coordinator.on_callback_failure,
            CallbackFailurePolicy::Prune
        );
        assert_eq!(config.node.coordinator_url, "http://127.0.0.1:1224");
        assert!(config.coordinator.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[coordinator]
bind_addr = "127.0.0.1:9000"
restore = "always"
callback_timeout_ms = 250
on_callback_failure = "fail"
"#
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.coordinator.bind_addr.port(), 9000);
        assert_eq!(config.coordinator.restore, RestoreMode::Always);
        assert_eq!(config.coordinator.callback_timeout(), Duration::from_millis(250));
        assert_eq!(
            config.coordinator.on_callback_failure,
            CallbackFailurePolicy::Fail
        );
        // untouched sections keep their defaults
        assert_eq!(config.coordinator.probe_timeout_ms, 1_000);
        assert_eq!(config.node.grant_wait_ms, 2_000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = CoordinatorConfig {
            callback_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
