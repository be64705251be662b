//! Message service: the only writer of conversation state.
//!
//! Every mutation goes through the [`SessionStore`]; every appended message is
//! then handed to the [`Hub`] for delivery to the conversation's owner. The
//! order is always append, persist, notify, and the hand-off happens before
//! the next append to the same conversation can start.

use crate::backend::ConversationalBackend;
use crate::conversation::Conversation;
use crate::error::ConversationError;
use crate::hub::Hub;
use crate::message::{Message, MessageType, NewMessage};
use crate::store::{SessionStore, StoreResult};
use courier_core::{ConversationId, UserId};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Conversation operations shared by the HTTP, WebSocket and webhook paths.
pub struct MessageService {
    store: Arc<SessionStore>,
    hub: Hub,
    backend: Arc<dyn ConversationalBackend>,
}

impl MessageService {
    /// Creates a service over the given store, hub and backend.
    #[must_use]
    pub fn new(store: Arc<SessionStore>, hub: Hub, backend: Arc<dyn ConversationalBackend>) -> Self {
        Self {
            store,
            hub,
            backend,
        }
    }

    /// The underlying session store.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Creates a conversation for `user_id`.
    ///
    /// # Errors
    ///
    /// `Validation` if the user ID is blank.
    #[instrument(skip_all, fields(user_id = %user_id, channel = %channel))]
    pub async fn create_conversation(
        &self,
        user_id: UserId,
        agent_id: Option<String>,
        channel: &str,
        channel_id: &str,
    ) -> StoreResult<Conversation> {
        if user_id.is_empty() {
            return Err(ConversationError::validation("user_id is required").into());
        }
        let conversation = self
            .store
            .create(user_id, agent_id, channel, channel_id)
            .await;
        info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Returns a conversation.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Upstream`, see [`SessionStore::get`].
    pub async fn get_conversation(&self, id: ConversationId) -> StoreResult<Conversation> {
        self.store.get(id).await
    }

    /// Lists a user's conversations, most recently updated first.
    pub async fn list_conversations(&self, user_id: &UserId) -> Vec<Conversation> {
        self.store.list(user_id).await
    }

    /// Deletes a conversation. Idempotent.
    #[instrument(skip(self))]
    pub async fn delete_conversation(&self, id: ConversationId) {
        self.store.delete(id).await;
        info!("conversation deleted");
    }

    /// Sets an explicit title, which later messages never replace.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank title, otherwise as [`SessionStore::update`].
    #[instrument(skip(self, title))]
    pub async fn rename_conversation(
        &self,
        id: ConversationId,
        title: &str,
    ) -> StoreResult<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ConversationError::validation("title is required").into());
        }
        let ((), conversation) = self.store.update(id, |c| c.rename(title)).await?;
        Ok(conversation)
    }

    /// Appends a message and delivers it to the conversation's owner.
    ///
    /// # Errors
    ///
    /// `Validation` for blank content, otherwise as [`SessionStore::update`].
    #[instrument(skip(self, draft), fields(sender = %draft.sender))]
    pub async fn send_message(&self, id: ConversationId, draft: NewMessage) -> StoreResult<Message> {
        if draft.content.trim().is_empty() {
            return Err(ConversationError::validation("content is required").into());
        }

        let hub = &self.hub;
        let (message, _) = self
            .store
            .update_and_notify(
                id,
                |c| {
                    let message =
                        Message::from_draft(draft, c.user_id.as_str(), c.channel_id.as_str());
                    c.append(message.clone());
                    message
                },
                |message: &Message, conversation: &Conversation| {
                    let message = message.clone();
                    let owner = conversation.user_id.clone();
                    async move { hub.send_to_user(&owner, &message).await }
                },
            )
            .await?;

        debug!(message_id = %message.id, "message appended");
        Ok(message)
    }

    /// Returns a window of a conversation's messages in append order.
    ///
    /// Out-of-range offsets and limits are clamped, never rejected.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Upstream`, see [`SessionStore::get`].
    pub async fn get_messages(
        &self,
        id: ConversationId,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let conversation = self.store.get(id).await?;
        Ok(conversation.page(limit, offset).to_vec())
    }

    /// Records a user's message, asks the backend for a reply and records
    /// that too. Returns the reply.
    ///
    /// If the backend fails the user's message stays recorded.
    ///
    /// # Errors
    ///
    /// `Upstream` if the backend fails, otherwise as
    /// [`MessageService::send_message`].
    #[instrument(skip(self, content))]
    pub async fn process_inbound_message(
        &self,
        id: ConversationId,
        message_type: MessageType,
        content: &str,
    ) -> StoreResult<Message> {
        let conversation = self.store.get(id).await?;

        self.send_message(
            id,
            NewMessage::user_text(content)
                .with_type(message_type)
                .with_sender_id(conversation.user_id.as_str()),
        )
        .await?;

        let reply = self.backend.reply(id, content).await.map_err(|e| {
            warn!(error = %e, "backend failed to reply");
            ConversationError::Upstream {
                reason: e.to_string(),
            }
        })?;

        let agent = conversation.agent_id.unwrap_or_default();
        self.send_message(id, NewMessage::bot_text(reply).with_sender_id(agent))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;
    use crate::connection::Connection;
    use crate::durable::{CONVERSATION_TTL, InMemoryDurableCache};
    use crate::error::BackendError;
    use crate::hub::DEFAULT_COMMAND_BUFFER;
    use crate::message::Sender;
    use async_trait::async_trait;

    struct FailingBackend;

    #[async_trait]
    impl ConversationalBackend for FailingBackend {
        async fn reply(&self, _: ConversationId, _: &str) -> Result<String, BackendError> {
            Err(BackendError::Unavailable {
                message: "model offline".to_string(),
            })
        }
    }

    fn service_with(backend: Arc<dyn ConversationalBackend>) -> (MessageService, Hub) {
        let hub = Hub::spawn(DEFAULT_COMMAND_BUFFER);
        let store = Arc::new(SessionStore::new(
            Arc::new(InMemoryDurableCache::new()),
            CONVERSATION_TTL,
        ));
        (MessageService::new(store, hub.clone(), backend), hub)
    }

    fn service() -> MessageService {
        service_with(Arc::new(EchoBackend)).0
    }

    async fn conversation(service: &MessageService, user: &str) -> Conversation {
        service
            .create_conversation(UserId::from(user), Some("agent-1".to_string()), "webapi", "c1")
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn first_user_message_names_conversation() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        service
            .send_message(conv.id, NewMessage::user_text("hello"))
            .await
            .expect("send");

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.title, "hello");
        assert_eq!(stored.messages[0].content, "hello");
        assert_eq!(stored.last_message, "hello");
        assert_eq!(stored.messages[0].receiver_id, "u1");
        assert_eq!(stored.messages[0].channel_id, "c1");
    }

    #[tokio::test]
    async fn later_messages_keep_the_title() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        service
            .send_message(conv.id, NewMessage::bot_text("welcome"))
            .await
            .expect("send");
        service
            .send_message(conv.id, NewMessage::user_text("first question"))
            .await
            .expect("send");
        service
            .send_message(conv.id, NewMessage::user_text("second question"))
            .await
            .expect("send");

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.title, "first question");
        assert_eq!(stored.last_message, "second question");
    }

    #[tokio::test]
    async fn renamed_title_is_never_derived_over() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        service
            .rename_conversation(conv.id, "  Billing  ")
            .await
            .expect("rename");
        service
            .send_message(conv.id, NewMessage::user_text("hello"))
            .await
            .expect("send");

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.title, "Billing");
    }

    #[tokio::test]
    async fn blank_inputs_are_rejected() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        let err = service
            .rename_conversation(conv.id, "   ")
            .await
            .expect_err("blank title");
        assert!(matches!(
            err.current_context(),
            ConversationError::Validation { .. }
        ));

        let err = service
            .send_message(conv.id, NewMessage::user_text(""))
            .await
            .expect_err("blank content");
        assert!(matches!(
            err.current_context(),
            ConversationError::Validation { .. }
        ));

        let err = service
            .create_conversation(UserId::from(" "), None, "webapi", "")
            .await
            .expect_err("blank user");
        assert!(matches!(
            err.current_context(),
            ConversationError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn messages_come_back_in_send_order() {
        let service = service();
        let conv = conversation(&service, "u1").await;
        for i in 0..5 {
            service
                .send_message(
                    conv.id,
                    NewMessage::user_text(format!("m{i}")).with_type(MessageType::Command),
                )
                .await
                .expect("send");
        }

        let all = service.get_messages(conv.id, 0, 0).await.expect("page");
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);

        let window = service.get_messages(conv.id, 2, 1).await.expect("page");
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "m1");

        assert!(
            service
                .get_messages(conv.id, 10, 99)
                .await
                .expect("page")
                .is_empty()
        );
        assert_eq!(
            service.get_messages(conv.id, 100, -3).await.expect("page").len(),
            5
        );
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let service = service();
        let err = service
            .get_messages(ConversationId::new(), 10, 0)
            .await
            .expect_err("missing");
        assert!(matches!(
            err.current_context(),
            ConversationError::NotFound { .. }
        ));

        let err = service
            .send_message(ConversationId::new(), NewMessage::user_text("x"))
            .await
            .expect_err("missing");
        assert!(matches!(
            err.current_context(),
            ConversationError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn sent_messages_reach_the_owner_only() {
        let (service, hub) = service_with(Arc::new(EchoBackend));
        let conv = conversation(&service, "u1").await;

        let (phone, phone_tx, mut phone_rx) = Connection::open(UserId::from("u1"), None, 8);
        let (laptop, laptop_tx, mut laptop_rx) = Connection::open(UserId::from("u1"), None, 8);
        let (other, other_tx, mut other_rx) = Connection::open(UserId::from("u2"), None, 8);
        hub.register(phone, phone_tx).await;
        hub.register(laptop, laptop_tx).await;
        hub.register(other, other_tx).await;

        let sent = service
            .send_message(conv.id, NewMessage::user_text("m"))
            .await
            .expect("send");
        hub.connection_count().await;

        for rx in [&mut phone_rx, &mut laptop_rx] {
            let payload = rx.try_recv().expect("delivered");
            let delivered: Message = serde_json::from_str(&payload).expect("json");
            assert_eq!(delivered, sent);
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_senders_are_delivered_in_append_order() {
        let (service, hub) = service_with(Arc::new(EchoBackend));
        let service = Arc::new(service);
        let id = conversation(&service, "u1").await.id;
        let (device, tx, mut rx) = Connection::open(UserId::from("u1"), None, 4096);
        assert!(hub.register(device, tx).await);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let service = service.clone();
                tokio::spawn(async move {
                    for i in 0..250 {
                        service
                            .send_message(id, NewMessage::user_text(format!("p{p}-{i}")))
                            .await
                            .expect("send");
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.expect("producer");
        }
        hub.connection_count().await;

        let stored: Vec<_> = service
            .get_conversation(id)
            .await
            .expect("get")
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect();
        let mut delivered = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            let message: Message = serde_json::from_str(&payload).expect("json");
            delivered.push(message.id);
        }
        assert_eq!(stored.len(), 1000);
        assert_eq!(delivered, stored);
    }

    #[tokio::test]
    async fn inbound_message_keeps_its_type() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        service
            .process_inbound_message(conv.id, MessageType::Image, "https://cdn.example/a.png")
            .await
            .expect("reply");

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.messages[0].message_type, MessageType::Image);
        assert_eq!(stored.messages[1].message_type, MessageType::Text);
    }

    #[tokio::test]
    async fn inbound_message_gets_a_bot_reply() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        let reply = service
            .process_inbound_message(conv.id, MessageType::Text, "ping")
            .await
            .expect("reply");
        assert_eq!(reply.content, "Received: ping");
        assert_eq!(reply.sender, Sender::Bot);
        assert_eq!(reply.sender_id, "agent-1");

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.message_count(), 2);
        assert_eq!(stored.messages[0].sender_id, "u1");
    }

    #[tokio::test]
    async fn backend_failure_keeps_the_inbound_message() {
        let (service, _hub) = service_with(Arc::new(FailingBackend));
        let conv = conversation(&service, "u1").await;

        let err = service
            .process_inbound_message(conv.id, MessageType::Text, "are you there?")
            .await
            .expect_err("backend down");
        assert!(matches!(
            err.current_context(),
            ConversationError::Upstream { .. }
        ));

        let stored = service.get_conversation(conv.id).await.expect("get");
        assert_eq!(stored.message_count(), 1);
        assert!(stored.messages[0].is_from_user());
        assert_eq!(stored.title, "are you there?");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let service = service();
        let conv = conversation(&service, "u1").await;

        service.delete_conversation(conv.id).await;
        service.delete_conversation(conv.id).await;

        assert!(service.get_conversation(conv.id).await.is_err());
        assert!(service.list_conversations(&UserId::from("u1")).await.is_empty());
    }
}
