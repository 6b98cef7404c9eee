//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};

use crate::NodeError;

/// A statically configured delegator entry for deployments where the
/// ballot registry is provisioned out of band.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegatorEntry {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub ticket: u64,
}

/// Configuration for a Kestrel node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port to listen on for P2P connections.
    #[serde(default = "default_p2p_port")]
    pub port: u16,

    /// Peer addresses to dial on startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Maximum number of peer connections.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Hex seed for the node's signing key. Generated fresh when absent.
    #[serde(default)]
    pub key_seed: Option<String>,

    /// Election round length in seconds.
    #[serde(default = "default_round_interval")]
    pub round_interval_secs: u64,

    /// Big-period length in seconds.
    #[serde(default = "default_period_interval")]
    pub big_period_secs: u64,

    /// Quiet interval after which a LOOKING node with the best known
    /// credential declares itself the winner.
    #[serde(default = "default_quiet_interval")]
    pub quiet_interval_secs: u64,

    /// Address of the on-chain ballot contract (hex).
    #[serde(default = "default_ballot_address")]
    pub ballot_address: String,

    /// DApp addresses (hex) whose sub-chains this node carries.
    #[serde(default)]
    pub dapp_chains: Vec<String>,

    /// Statically provisioned delegator registry, served through the
    /// ballot accessor when the deployment has no contract VM.
    #[serde(default)]
    pub delegators: Vec<DelegatorEntry>,

    /// Disarm the election and period timers; inputs are then injected
    /// manually. Test deployments only.
    #[serde(default)]
    pub skip_timers: bool,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_p2p_port() -> u16 {
    30310
}

fn default_max_peers() -> usize {
    50
}

fn default_round_interval() -> u64 {
    10
}

fn default_period_interval() -> u64 {
    300
}

fn default_quiet_interval() -> u64 {
    5
}

fn default_ballot_address() -> String {
    // Well-known ballot contract address.
    "0x0000000000000000000000000000000000000042".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: default_p2p_port(),
            bootstrap_peers: Vec::new(),
            max_peers: default_max_peers(),
            key_seed: None,
            round_interval_secs: default_round_interval(),
            big_period_secs: default_period_interval(),
            quiet_interval_secs: default_quiet_interval(),
            ballot_address: default_ballot_address(),
            dapp_chains: Vec::new(),
            delegators: Vec::new(),
            skip_timers: false,
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
