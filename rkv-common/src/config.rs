//! # Connection Options
//!
//! Serializable description of where to connect and how hard to try.
//! Hosts usually deserialize this from their own configuration file; the
//! retry hook is attached in code because closures do not serialize.

use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{RkvError, RkvResult};

/// Label used in log lines when no connection name is configured.
pub const DEFAULT_CONNECTION_NAME: &str = "default";

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Default fixed delay between reconnect attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

/// Top-level options for one logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Optional label, sent to the server via `CLIENT SETNAME` and used in logs.
    #[serde(default)]
    pub connection_name: Option<String>,
    /// Number of reconnect attempts before establishment fails.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between reconnect attempts, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Include the raw error message in retry log lines.
    #[serde(default)]
    pub verbose_retry_log: bool,
    /// Single node or cluster target.
    #[serde(flatten)]
    pub target: ConnectionTarget,
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            connection_name: None,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            verbose_retry_log: false,
            target: ConnectionTarget::Default(NodeOptions::default()),
        }
    }
}

impl ConnectionOptions {
    /// Options for a single node at `host:port`.
    pub fn single(host: impl Into<String>, port: u16) -> Self {
        ConnectionOptions {
            target: ConnectionTarget::Default(NodeOptions {
                host: host.into(),
                port,
                ..NodeOptions::default()
            }),
            ..ConnectionOptions::default()
        }
    }

    /// Options for a cluster reachable through `startup_nodes`.
    pub fn cluster(startup_nodes: Vec<NodeAddress>) -> Self {
        ConnectionOptions {
            target: ConnectionTarget::Cluster(ClusterOptions {
                startup_nodes,
                ..ClusterOptions::default()
            }),
            ..ConnectionOptions::default()
        }
    }

    /// Parses options from JSON text and validates them.
    pub fn from_json_str(text: &str) -> RkvResult<Self> {
        let options: ConnectionOptions = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> RkvResult<()> {
        match &self.target {
            ConnectionTarget::Cluster(cluster) if cluster.startup_nodes.is_empty() => Err(
                RkvError::Config("cluster mode requires at least one startup node".to_string()),
            ),
            ConnectionTarget::Default(node) if node.host.is_empty() => {
                Err(RkvError::Config("host must not be empty".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay.as_millis() as u64;
        self
    }

    pub fn with_verbose_retry_log(mut self, verbose: bool) -> Self {
        self.verbose_retry_log = verbose;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    /// Name used in log lines.
    pub fn label(&self) -> &str {
        self.connection_name
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_NAME)
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.target, ConnectionTarget::Cluster(_))
    }
}

/// Mode selector plus mode-specific settings.
///
/// Serialized with a `type` tag. A missing tag deserializes as `default`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionTarget {
    Default(NodeOptions),
    Cluster(ClusterOptions),
}

/// Wire form of `ConnectionTarget` once the tag is known to be present.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedTarget {
    Default(NodeOptions),
    Cluster(ClusterOptions),
}

impl<'de> Deserialize<'de> for ConnectionTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = serde_json::Map::deserialize(deserializer)?;
        fields
            .entry("type")
            .or_insert_with(|| serde_json::Value::from("default"));

        match TaggedTarget::deserialize(serde_json::Value::Object(fields)).map_err(de::Error::custom)? {
            TaggedTarget::Default(node) => Ok(ConnectionTarget::Default(node)),
            TaggedTarget::Cluster(cluster) => Ok(ConnectionTarget::Cluster(cluster)),
        }
    }
}

/// Settings for a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOptions {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logical database selected after connecting.
    #[serde(default)]
    pub db: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            host: default_host(),
            port: default_port(),
            db: None,
            username: None,
            password: None,
        }
    }
}

impl NodeOptions {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A `host:port` pair naming one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeAddress {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings for a cluster connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    pub startup_nodes: Vec<NodeAddress>,
    /// Credentials applied to every member connection.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}
