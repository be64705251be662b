//! The durable, TTL-bound cache tier.
//!
//! Conversations are mirrored here as JSON under `conversation:{id}` so that
//! another process (or this one after eviction or restart) can recover them
//! until the TTL lapses. Every write refreshes the TTL.

use crate::error::DurableCacheError;
use async_trait::async_trait;
use courier_core::ConversationId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a conversation survives in the durable tier without writes.
pub const CONVERSATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Returns the durable-tier key for a conversation.
#[must_use]
pub fn conversation_key(id: ConversationId) -> String {
    format!("conversation:{id}")
}

/// Opaque get/set/delete-with-TTL access to the durable tier.
///
/// This abstraction allows testing without a running cache server.
#[async_trait]
pub trait DurableCache: Send + Sync {
    /// Reads a value. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableCacheError>;

    /// Writes a value, replacing any previous one and restarting its TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DurableCacheError>;

    /// Deletes a value. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), DurableCacheError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local stand-in for the durable tier.
///
/// Honours TTLs, which makes it useful for development and for exercising
/// expiry in tests with a paused clock.
#[derive(Default)]
pub struct InMemoryDurableCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryDurableCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Returns true if no live entries remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DurableCache for InMemoryDurableCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableCacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DurableCacheError> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DurableCacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
