//! Two-tier conversation session store.
//!
//! The process-local cache is authoritative for reads within this process.
//! Every change is mirrored to the durable tier by a single background
//! writer, in the order the changes were made, so the durable copy may lag
//! but never goes backwards. Durable-tier I/O never happens while the cache
//! lock is held.
//!
//! A conversation whose durable delete is still in flight cannot be reloaded,
//! so a read racing a delete never brings it back.

use crate::conversation::Conversation;
use crate::durable::{DurableCache, conversation_key};
use crate::error::{ConversationError, DurableCacheError};
use chrono::{DateTime, Utc};
use courier_core::{ConversationId, UserId};
use std::collections::{HashMap, HashSet};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, instrument, warn};

/// Result type for store operations.
pub type StoreResult<T> = courier_core::Result<T, ConversationError>;

struct CachedConversation {
    /// Insertion order, used to break `updated_at` ties.
    seq: u64,
    conversation: Conversation,
}

#[derive(Default)]
struct Cache {
    next_seq: u64,
    entries: HashMap<ConversationId, CachedConversation>,
    /// Conversations whose durable delete has not completed yet.
    deleting: HashSet<ConversationId>,
    /// Bumped every time a delete starts.
    delete_epoch: u64,
}

impl Cache {
    fn insert(&mut self, conversation: Conversation) -> &CachedConversation {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .entry(conversation.id)
            .or_insert(CachedConversation { seq, conversation })
    }
}

enum MirrorOp {
    Put(Box<Conversation>),
    Delete {
        key: String,
        done: oneshot::Sender<()>,
    },
    Flush(oneshot::Sender<()>),
}

/// Session store fronting the durable tier with a process-local cache.
pub struct SessionStore {
    cache: RwLock<Cache>,
    durable: Arc<dyn DurableCache>,
    mirror: mpsc::UnboundedSender<MirrorOp>,
}

impl SessionStore {
    /// Creates a store and starts its mirror writer.
    ///
    /// Must be called from within a tokio runtime. The writer stops once the
    /// store is dropped and the queued writes have been applied.
    #[must_use]
    pub fn new(durable: Arc<dyn DurableCache>, ttl: Duration) -> Self {
        let (mirror, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mirror(durable.clone(), ttl, rx));
        Self {
            cache: RwLock::new(Cache::default()),
            durable,
            mirror,
        }
    }

    /// Creates a new, empty conversation.
    ///
    /// Never fails because of the durable tier; the mirror write is
    /// best-effort.
    #[instrument(skip_all, fields(user_id = %user_id, channel = %channel))]
    pub async fn create(
        &self,
        user_id: UserId,
        agent_id: Option<String>,
        channel: &str,
        channel_id: &str,
    ) -> Conversation {
        let conversation = Conversation::new(user_id, agent_id, channel, channel_id);
        let mut cache = self.cache.write().await;
        cache.insert(conversation.clone());
        self.schedule_put(&conversation);
        debug!(conversation_id = %conversation.id, "conversation created");
        conversation
    }

    /// Returns a conversation, reloading it from the durable tier on a miss.
    ///
    /// # Errors
    ///
    /// `NotFound` if neither tier has it, `Upstream` if the durable tier
    /// failed or returned an unreadable value.
    pub async fn get(&self, id: ConversationId) -> StoreResult<Conversation> {
        if let Some(entry) = self.cache.read().await.entries.get(&id) {
            return Ok(entry.conversation.clone());
        }
        self.load(id).await
    }

    /// Lists the user's cached conversations, most recently updated first.
    ///
    /// Only conversations currently in the local cache are included.
    pub async fn list(&self, user_id: &UserId) -> Vec<Conversation> {
        let cache = self.cache.read().await;
        let mut found: Vec<&CachedConversation> = cache
            .entries
            .values()
            .filter(|entry| &entry.conversation.user_id == user_id)
            .collect();
        found.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then(a.seq.cmp(&b.seq))
        });
        found
            .into_iter()
            .map(|entry| entry.conversation.clone())
            .collect()
    }

    /// Finds the user's most recently updated cached conversation on a
    /// channel endpoint.
    pub async fn find_by_channel(
        &self,
        channel: &str,
        channel_id: &str,
        user_id: &UserId,
    ) -> Option<Conversation> {
        let cache = self.cache.read().await;
        cache
            .entries
            .values()
            .map(|entry| &entry.conversation)
            .filter(|c| {
                c.channel == channel && c.channel_id == channel_id && &c.user_id == user_id
            })
            .max_by_key(|c| c.updated_at)
            .cloned()
    }

    /// Applies `change` to a conversation and mirrors the result.
    ///
    /// Returns the closure's output and the updated snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::get`].
    pub async fn update<R>(
        &self,
        id: ConversationId,
        change: impl FnOnce(&mut Conversation) -> R,
    ) -> StoreResult<(R, Conversation)> {
        self.update_and_notify(id, change, |_, _| future::ready(()))
            .await
    }

    /// Like [`SessionStore::update`], but awaits `notify` before the cache
    /// lock is released.
    ///
    /// Notifications for one conversation therefore leave in the same order
    /// as its changes. `notify` must not touch the store.
    ///
    /// # Errors
    ///
    /// Same as [`SessionStore::get`].
    pub async fn update_and_notify<R, N, F>(
        &self,
        id: ConversationId,
        change: impl FnOnce(&mut Conversation) -> R,
        notify: N,
    ) -> StoreResult<(R, Conversation)>
    where
        N: FnOnce(&R, &Conversation) -> F,
        F: Future<Output = ()>,
    {
        if !self.cache.read().await.entries.contains_key(&id) {
            self.load(id).await?;
        }

        let mut cache = self.cache.write().await;
        let entry = cache
            .entries
            .get_mut(&id)
            .ok_or_else(|| ConversationError::not_found(id))?;
        let output = change(&mut entry.conversation);
        let snapshot = entry.conversation.clone();
        self.schedule_put(&snapshot);
        notify(&output, &snapshot).await;
        drop(cache);
        Ok((output, snapshot))
    }

    /// Removes a conversation from both tiers. Idempotent.
    ///
    /// Waits for the durable delete to be attempted so that a later `get`
    /// cannot resurrect the conversation; a failed durable delete is logged.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ConversationId) {
        let (done, applied) = oneshot::channel();
        {
            let mut cache = self.cache.write().await;
            cache.entries.remove(&id);
            let op = MirrorOp::Delete {
                key: conversation_key(id),
                done,
            };
            if self.mirror.send(op).is_err() {
                warn!("mirror writer stopped, durable copy not deleted");
                return;
            }
            cache.deleting.insert(id);
            cache.delete_epoch += 1;
        }
        let _ = applied.await;
        self.cache.write().await.deleting.remove(&id);
    }

    /// Drops a conversation from the local cache only.
    ///
    /// It stays recoverable from the durable tier until its TTL lapses.
    pub async fn evict(&self, id: ConversationId) -> bool {
        self.cache.write().await.entries.remove(&id).is_some()
    }

    /// Evicts every cached conversation not updated since `cutoff`.
    ///
    /// Returns the number evicted.
    pub async fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.entries.len();
        cache
            .entries
            .retain(|_, entry| entry.conversation.updated_at >= cutoff);
        before - cache.entries.len()
    }

    /// Number of conversations in the local cache.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    /// Waits until every mirror write queued so far has been attempted.
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.mirror.send(MirrorOp::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    async fn load(&self, id: ConversationId) -> StoreResult<Conversation> {
        loop {
            let epoch = {
                let cache = self.cache.read().await;
                if cache.deleting.contains(&id) {
                    return Err(ConversationError::not_found(id).into());
                }
                cache.delete_epoch
            };

            let conversation = self.fetch(id).await?;

            let mut cache = self.cache.write().await;
            // A concurrent writer may have populated the cache meanwhile; its
            // copy is newer than ours.
            if let Some(entry) = cache.entries.get(&id) {
                return Ok(entry.conversation.clone());
            }
            if cache.delete_epoch != epoch {
                debug!(conversation_id = %id, "delete raced a reload, reading again");
                continue;
            }
            debug!(conversation_id = %id, "conversation reloaded from durable tier");
            return Ok(cache.insert(conversation).conversation.clone());
        }
    }

    async fn fetch(&self, id: ConversationId) -> StoreResult<Conversation> {
        let key = conversation_key(id);
        let raw = self
            .durable
            .get(&key)
            .await
            .map_err(|e| ConversationError::Upstream {
                reason: e.to_string(),
            })?
            .ok_or_else(|| ConversationError::not_found(id))?;

        serde_json::from_slice(&raw).map_err(|e| {
            let error = DurableCacheError::Serialization {
                key,
                message: e.to_string(),
            };
            ConversationError::Upstream {
                reason: error.to_string(),
            }
            .into()
        })
    }

    fn schedule_put(&self, conversation: &Conversation) {
        if self
            .mirror
            .send(MirrorOp::Put(Box::new(conversation.clone())))
            .is_err()
        {
            warn!(conversation_id = %conversation.id, "mirror writer stopped, durable copy is stale");
        }
    }
}

async fn run_mirror(
    durable: Arc<dyn DurableCache>,
    ttl: Duration,
    mut ops: mpsc::UnboundedReceiver<MirrorOp>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            MirrorOp::Put(conversation) => {
                let key = conversation_key(conversation.id);
                let bytes = match serde_json::to_vec(&*conversation) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let error = DurableCacheError::Serialization {
                            key,
                            message: e.to_string(),
                        };
                        warn!(%error, "conversation not mirrored");
                        continue;
                    }
                };
                if let Err(e) = durable.set(&key, bytes, ttl).await {
                    warn!(key, error = %e, "durable mirror write failed");
                }
            }
            MirrorOp::Delete { key, done } => {
                if let Err(e) = durable.delete(&key).await {
                    warn!(key, error = %e, "durable delete failed");
                }
                let _ = done.send(());
            }
            MirrorOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("mirror writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{CONVERSATION_TTL, InMemoryDurableCache};
    use crate::message::{Message, NewMessage};
    use async_trait::async_trait;

    /// Durable tier that is always down.
    struct UnreachableCache;

    #[async_trait]
    impl DurableCache for UnreachableCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableCacheError> {
            Err(DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: "connection refused".to_string(),
            })
        }

        async fn set(&self, key: &str, _: Vec<u8>, _: Duration) -> Result<(), DurableCacheError> {
            Err(DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: "connection refused".to_string(),
            })
        }

        async fn delete(&self, key: &str) -> Result<(), DurableCacheError> {
            Err(DurableCacheError::OperationFailed {
                key: key.to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    /// In-memory durable tier whose deletes take a while.
    struct SlowDelete {
        inner: InMemoryDurableCache,
        delay: Duration,
    }

    #[async_trait]
    impl DurableCache for SlowDelete {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DurableCacheError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DurableCacheError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), DurableCacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }
    }

    fn store_with(durable: Arc<InMemoryDurableCache>) -> SessionStore {
        SessionStore::new(durable, CONVERSATION_TTL)
    }

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    #[tokio::test]
    async fn create_mirrors_to_durable_tier() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable.clone());

        let conv = store.create(user("u1"), None, "webapi", "c1").await;
        store.flush().await;

        let raw = durable
            .get(&conversation_key(conv.id))
            .await
            .expect("get")
            .expect("mirrored");
        let mirrored: Conversation = serde_json::from_slice(&raw).expect("json");
        assert_eq!(mirrored, conv);
    }

    #[tokio::test]
    async fn get_reloads_evicted_conversation() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable);

        let conv = store.create(user("u1"), None, "webapi", "c1").await;
        store.flush().await;
        assert!(store.evict(conv.id).await);
        assert!(store.list(&user("u1")).await.is_empty());

        let loaded = store.get(conv.id).await.expect("recovered");
        assert_eq!(loaded.id, conv.id);
        assert_eq!(store.list(&user("u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = store_with(Arc::new(InMemoryDurableCache::new()));
        let id = ConversationId::new();

        let err = store.get(id).await.expect_err("missing");
        assert_eq!(*err.current_context(), ConversationError::not_found(id));
    }

    #[tokio::test]
    async fn unreachable_durable_tier_does_not_fail_writes() {
        let store = SessionStore::new(Arc::new(UnreachableCache), CONVERSATION_TTL);

        let conv = store.create(user("u1"), None, "webapi", "c1").await;
        let (_, updated) = store
            .update(conv.id, |c| c.rename("renamed"))
            .await
            .expect("local cache is authoritative");
        store.flush().await;

        assert_eq!(updated.title, "renamed");
        assert_eq!(store.get(conv.id).await.expect("cached").title, "renamed");
        store.delete(conv.id).await;
    }

    #[tokio::test]
    async fn unreachable_durable_tier_on_miss_is_upstream_error() {
        let store = SessionStore::new(Arc::new(UnreachableCache), CONVERSATION_TTL);
        let err = store.get(ConversationId::new()).await.expect_err("miss");
        assert!(matches!(
            err.current_context(),
            ConversationError::Upstream { .. }
        ));
    }

    #[tokio::test]
    async fn mirror_keeps_latest_snapshot() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable.clone());
        let conv = store.create(user("u1"), None, "webapi", "c1").await;

        for i in 0..20 {
            store
                .update(conv.id, |c| {
                    c.append(Message::from_draft(
                        NewMessage::user_text(format!("m{i}")),
                        "u1",
                        "c1",
                    ));
                })
                .await
                .expect("update");
        }
        store.flush().await;

        let raw = durable
            .get(&conversation_key(conv.id))
            .await
            .expect("get")
            .expect("mirrored");
        let mirrored: Conversation = serde_json::from_slice(&raw).expect("json");
        assert_eq!(mirrored.messages.len(), 20);
        assert_eq!(mirrored.last_message, "m19");
    }

    #[tokio::test]
    async fn delete_removes_both_tiers() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable.clone());
        let conv = store.create(user("u1"), None, "webapi", "c1").await;

        store.delete(conv.id).await;
        store.delete(conv.id).await;

        assert!(durable.is_empty().await);
        assert!(store.get(conv.id).await.is_err());
    }

    #[tokio::test]
    async fn malformed_durable_copy_is_upstream_error() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable.clone());
        let id = ConversationId::new();
        durable
            .set(&conversation_key(id), b"{not json".to_vec(), CONVERSATION_TTL)
            .await
            .expect("set");

        let err = store.get(id).await.expect_err("malformed");
        match err.current_context() {
            ConversationError::Upstream { reason } => assert!(reason.contains("malformed")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_orders_by_updated_at_then_insertion() {
        let store = store_with(Arc::new(InMemoryDurableCache::new()));
        let first = store.create(user("u1"), None, "webapi", "a").await;
        let second = store.create(user("u1"), None, "webapi", "b").await;
        let third = store.create(user("u1"), None, "webapi", "c").await;
        store.create(user("u2"), None, "webapi", "d").await;

        // Force a tie between first and third, both older than second.
        let stamp = Utc::now();
        for id in [first.id, third.id] {
            store
                .update(id, |c| c.updated_at = stamp)
                .await
                .expect("update");
        }
        store
            .update(second.id, |c| c.updated_at = stamp + chrono::Duration::seconds(1))
            .await
            .expect("update");

        let ids: Vec<_> = store.list(&user("u1")).await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.id, first.id, third.id]);
    }

    #[tokio::test]
    async fn find_by_channel_prefers_latest() {
        let store = store_with(Arc::new(InMemoryDurableCache::new()));
        let older = store.create(user("u1"), None, "wechat", "openid-1").await;
        let newer = store.create(user("u1"), None, "wechat", "openid-1").await;
        store
            .update(newer.id, |c| c.updated_at = older.updated_at + chrono::Duration::seconds(5))
            .await
            .expect("update");

        let found = store
            .find_by_channel("wechat", "openid-1", &user("u1"))
            .await
            .expect("found");
        assert_eq!(found.id, newer.id);
        assert!(
            store
                .find_by_channel("wechat", "other", &user("u1"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_by_channel_is_scoped_to_the_user() {
        let store = store_with(Arc::new(InMemoryDurableCache::new()));
        let mine = store.create(user("u1"), None, "webapi", "room-7").await;

        assert!(
            store
                .find_by_channel("webapi", "room-7", &user("u2"))
                .await
                .is_none()
        );
        let found = store
            .find_by_channel("webapi", "room-7", &user("u1"))
            .await
            .expect("found");
        assert_eq!(found.id, mine.id);
    }

    #[tokio::test]
    async fn get_during_slow_delete_does_not_resurrect() {
        let durable = Arc::new(SlowDelete {
            inner: InMemoryDurableCache::new(),
            delay: Duration::from_millis(200),
        });
        let store = Arc::new(SessionStore::new(durable, CONVERSATION_TTL));
        let conv = store.create(user("u1"), None, "webapi", "c1").await;
        store.flush().await;

        let deleting = tokio::spawn({
            let store = store.clone();
            async move { store.delete(conv.id).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get(conv.id).await.is_err());
        deleting.await.expect("delete task");

        assert!(store.get(conv.id).await.is_err());
        assert!(store.update(conv.id, |c| c.rename("back")).await.is_err());
        assert_eq!(store.cached_count().await, 0);
    }

    #[tokio::test]
    async fn evict_idle_keeps_recent_conversations() {
        let store = store_with(Arc::new(InMemoryDurableCache::new()));
        let stale = store.create(user("u1"), None, "webapi", "a").await;
        store.create(user("u1"), None, "webapi", "b").await;
        store
            .update(stale.id, |c| c.updated_at = Utc::now() - chrono::Duration::hours(3))
            .await
            .expect("update");

        let evicted = store
            .evict_idle(Utc::now() - chrono::Duration::hours(1))
            .await;
        assert_eq!(evicted, 1);
        assert_eq!(store.cached_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_durable_copy_is_lost_after_eviction() {
        let durable = Arc::new(InMemoryDurableCache::new());
        let store = store_with(durable);
        let conv = store.create(user("u1"), None, "webapi", "a").await;
        store.flush().await;
        store.evict(conv.id).await;

        tokio::time::advance(CONVERSATION_TTL + Duration::from_secs(1)).await;

        let err = store.get(conv.id).await.expect_err("expired");
        assert!(matches!(
            err.current_context(),
            ConversationError::NotFound { .. }
        ));
    }
}
