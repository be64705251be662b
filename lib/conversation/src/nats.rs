//! NATS JetStream key-value implementation of the durable tier.
//!
//! The bucket's `max_age` is the conversation TTL; every put restarts the
//! age of that key, so active conversations stay alive.

use crate::durable::DurableCache;
use crate::error::DurableCacheError;
use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Default bucket name for mirrored conversations.
pub const DEFAULT_BUCKET: &str = "conversations";

/// Configuration for the NATS-backed durable tier.
#[derive(Debug, Clone)]
pub struct NatsCacheConfig {
    /// NATS server URL.
    pub url: String,
    /// Key-value bucket name (defaults to `conversations`).
    pub bucket: Option<String>,
    /// Bucket-wide TTL.
    pub ttl: Duration,
}

impl NatsCacheConfig {
    /// Creates a config with the given URL and TTL.
    #[must_use]
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            bucket: None,
            ttl,
        }
    }

    fn bucket(&self) -> &str {
        self.bucket.as_deref().unwrap_or(DEFAULT_BUCKET)
    }
}

/// Durable tier backed by a JetStream key-value bucket.
pub struct NatsKvCache {
    store: kv::Store,
    ttl: Duration,
}

impl NatsKvCache {
    /// Connects to NATS and opens (or creates) the bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or bucket setup fails.
    pub async fn connect(config: NatsCacheConfig) -> Result<Self, DurableCacheError> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            DurableCacheError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;
        let jetstream = jetstream::new(client);

        let store = match jetstream.get_key_value(config.bucket()).await {
            Ok(store) => store,
            Err(e) => {
                debug!(bucket = config.bucket(), error = %e, "bucket missing, creating it");
                jetstream
                    .create_key_value(kv::Config {
                        bucket: config.bucket().to_string(),
                        history: 1,
                        max_age: config.ttl,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| DurableCacheError::ConnectionFailed {
                        message: format!("failed to create bucket: {e}"),
                    })?
            }
        };

        info!(url = %config.url, bucket = config.bucket(), "connected durable tier");
        Ok(Self {
            store,
            ttl: config.ttl,
        })
    }

    /// KV keys may not contain `:`, so the namespace separator becomes `.`.
    fn kv_key(key: &str) -> String {
        key.replace(':', ".")
    }
}

#[async_trait]
impl DurableCache for NatsKvCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableCacheError> {
        self.store
            .get(Self::kv_key(key))
            .await
            .map(|value| value.map(|bytes| bytes.to_vec()))
            .map_err(|e| DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DurableCacheError> {
        if ttl != self.ttl {
            debug!(key, ?ttl, bucket_ttl = ?self.ttl, "per-key TTL ignored, bucket TTL applies");
        }
        self.store
            .put(Self::kv_key(key), value.into())
            .await
            .map(|_revision| ())
            .map_err(|e| DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), DurableCacheError> {
        self.store
            .delete(Self::kv_key(key))
            .await
            .map(|_| ())
            .map_err(|e| DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}
