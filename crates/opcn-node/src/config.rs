//! Node configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full configuration for an OPCN node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Node identity settings.
    #[serde(default)]
    pub node: NodeSection,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageSection,

    /// Payment and forwarding settings.
    #[serde(default)]
    pub payments: PaymentsSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// This node's identifier on the network.
    #[serde(default = "default_node_id")]
    pub id: String,
    /// Block height the node starts at (advanced by the chain follower).
    #[serde(default = "default_initial_height")]
    pub initial_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageSection {
    /// Data directory for persistent channel/HTLC state. Unset runs the
    /// node in-memory (tests and ephemeral deployments).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsSection {
    /// Overall timeout for an originated payment, in seconds.
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,
    /// Per-subscriber HTLC event queue depth.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Flat fee advertised for forwarding over this node's channels.
    #[serde(default)]
    pub base_fee: u64,
    /// Expiry margin advertised for forwarding over this node's channels.
    #[serde(default = "default_expiry_delta")]
    pub expiry_delta: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_node_id() -> String {
    "opcn-node".into()
}
fn default_initial_height() -> u64 {
    100
}
fn default_payment_timeout() -> u64 {
    30
}
fn default_event_queue_capacity() -> usize {
    128
}
fn default_expiry_delta() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            initial_height: default_initial_height(),
        }
    }
}

impl Default for PaymentsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_payment_timeout(),
            event_queue_capacity: default_event_queue_capacity(),
            base_fee: 0,
            expiry_delta: default_expiry_delta(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NodeConfig {
    /// Default config with the given node id (in-memory, zero fees).
    pub fn with_id(id: &str) -> Self {
        let mut config = Self::default();
        config.node.id = id.into();
        config
    }

    /// Load configuration from a TOML file; missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
