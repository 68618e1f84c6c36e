//! Configuration types for the cluster and its nodes.

use std::time::Duration;

use serde::Deserialize;

use crate::routing::SelectionStrategy;

/// Default `Client-Name` header and HTTP user agent.
pub const DEFAULT_USER_AGENT: &str = "Rias";

/// Configuration for one audio node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeConfig {
    /// Unique node identifier within the cluster.
    pub id: String,
    /// Hostname or IP address of the node.
    pub host: String,
    /// Port serving both the event stream and REST.
    pub port: u16,
    /// Shared password sent in the `Authorization` header.
    pub password: String,
    /// Use wss/https instead of ws/http.
    #[serde(default)]
    pub secure: bool,
    /// Voice region this node is closest to, for regional routing.
    #[serde(default)]
    pub region: Option<String>,
    /// Routing priority, lower wins under the `Priority` strategy.
    #[serde(default)]
    pub priority: i32,
    /// Resume key; when set, a reconnected socket reclaims the prior session.
    #[serde(default)]
    pub resume_key: Option<String>,
    /// How long the node keeps a resumable session alive after a drop.
    #[serde(default = "default_resume_timeout", with = "duration_secs")]
    pub resume_timeout: Duration,
    /// Reconnect attempts before the node latches into `Disconnected`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential reconnect backoff.
    #[serde(default = "default_reconnect_delay", with = "duration_ms")]
    pub reconnect_delay: Duration,
}

impl NodeConfig {
    /// Create a node configuration with default lifecycle knobs.
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            password: password.into(),
            secure: false,
            region: None,
            priority: 0,
            resume_key: None,
            resume_timeout: default_resume_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay: default_reconnect_delay(),
        }
    }

    /// Set the voice region used by regional routing.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the routing priority (lower wins).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Enable session resuming under the given key.
    pub fn resume_key(mut self, key: impl Into<String>) -> Self {
        self.resume_key = Some(key.into());
        self
    }

    /// Use wss/https transports.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

fn default_resume_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(3000)
}

/// Configuration for the cluster client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RiasConfig {
    /// Nodes to manage. At least one is required to do anything useful.
    pub nodes: Vec<NodeConfig>,
    /// `Client-Name` header value and HTTP user agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Search prefix applied to bare queries, e.g. `scsearch`.
    /// Defaults to `ytsearch` when unset.
    #[serde(default)]
    pub default_search_source: Option<String>,
    /// Node-selection strategy used when creating players.
    #[serde(default)]
    pub node_selection_strategy: SelectionStrategy,
    /// Log full inbound frames at debug level.
    #[serde(default)]
    pub debug: bool,
}

impl RiasConfig {
    /// Create a configuration with default knobs for the given nodes.
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            user_agent: default_user_agent(),
            default_search_source: None,
            node_selection_strategy: SelectionStrategy::default(),
            debug: false,
        }
    }

    /// Set the node-selection strategy.
    pub fn strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.node_selection_strategy = strategy;
        self
    }

    /// Set the default search source prefix.
    pub fn default_search_source(mut self, source: impl Into<String>) -> Self {
        self.default_search_source = Some(source.into());
        self
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
