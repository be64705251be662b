//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables; nested keys use
//! a double underscore, e.g. `HUB__MAILBOX_CAPACITY`.

use courier_conversation::nats::DEFAULT_BUCKET;
use courier_conversation::{
    CONVERSATION_TTL, DEFAULT_COMMAND_BUFFER, DEFAULT_MAILBOX_CAPACITY, KEEPALIVE_INTERVAL,
};
use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Hub sizing.
    #[serde(default)]
    pub hub: HubConfig,

    /// WebSocket behaviour.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Session cache lifetimes.
    #[serde(default)]
    pub session: SessionConfig,

    /// Durable tier. Without a URL the in-memory tier is used.
    #[serde(default)]
    pub nats: NatsConfig,
}

/// Hub sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,
    /// Depth of the hub's request queue.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// WebSocket behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Idle seconds before a ping is sent.
    pub keepalive_seconds: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: KEEPALIVE_INTERVAL.as_secs(),
        }
    }
}

impl WebSocketConfig {
    /// Keep-alive interval; never zero.
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_seconds.max(1))
    }
}

/// Session cache lifetimes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Durable-tier TTL in seconds, refreshed on every write.
    pub ttl_seconds: u64,

    /// Conversations idle this long are dropped from the local cache.
    pub idle_evict_seconds: u64,

    /// Interval between idle-eviction runs, in seconds.
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: CONVERSATION_TTL.as_secs(),
            idle_evict_seconds: 3600,
            cleanup_interval_seconds: 300,
        }
    }
}

impl SessionConfig {
    /// Durable-tier TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// How long a conversation may sit unchanged before it leaves the local
    /// cache.
    #[must_use]
    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_evict_seconds)
    }

    /// Interval between idle-eviction runs; never zero.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

/// NATS JetStream key-value settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL. Absent means no NATS.
    pub url: Option<String>,
    /// Key-value bucket name.
    pub bucket: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: None,
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::default())
    }

    fn load(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
