//! Adapter registry and webhook routing.

use crate::adapter::{ChannelAdapter, ChannelType, WebhookRequest};
use crate::error::ChannelError;
use courier_conversation::{ConversationError, Message, MessageService};
use courier_core::ConversationId;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a handled webhook produced.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    /// The conversation the message landed in.
    pub conversation_id: ConversationId,
    /// The agent's reply.
    pub reply: Message,
}

/// Adapters by channel type.
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: HashMap<ChannelType, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter, replacing any previous one for the same channel.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel_type(), adapter);
    }

    /// Builder form of [`ChannelRegistry::register`].
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks up the adapter for a channel type name.
    ///
    /// # Errors
    ///
    /// `UnsupportedChannel` if the name is unknown or has no adapter.
    pub fn get(&self, channel_type: &str) -> Result<Arc<dyn ChannelAdapter>, ChannelError> {
        let channel: ChannelType = channel_type.parse()?;
        self.adapters
            .get(&channel)
            .cloned()
            .ok_or_else(|| ChannelError::UnsupportedChannel {
                channel_type: channel_type.to_string(),
            })
    }

    /// Registered channel types.
    #[must_use]
    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.adapters.keys().copied().collect()
    }

    /// Routes a webhook call through its adapter.
    ///
    /// Parses the payload, finds the sender's conversation on that channel
    /// endpoint (creating one on first contact), runs the message through the
    /// service and sends the reply back through the adapter.
    ///
    /// # Errors
    ///
    /// `UnsupportedChannel` or `InvalidPayload` for requests that cannot be
    /// accepted; `ProcessingFailed` or `DeliveryFailed` otherwise.
    #[instrument(skip(self, service, request))]
    pub async fn handle_webhook(
        &self,
        service: &MessageService,
        channel_type: &str,
        request: &WebhookRequest,
    ) -> Result<WebhookOutcome, Report<ChannelError>> {
        let adapter = self.get(channel_type)?;
        let inbound = adapter.parse_webhook(request)?;
        let channel = adapter.channel_type().as_str();

        let existing = service
            .store()
            .find_by_channel(channel, &inbound.channel_id, &inbound.user_id)
            .await;
        let conversation = match existing {
            Some(conversation) => conversation,
            None => service
                .create_conversation(inbound.user_id.clone(), None, channel, &inbound.channel_id)
                .await
                .map_err(processing_failed)?,
        };
        debug!(conversation_id = %conversation.id, "webhook routed");

        let reply = service
            .process_inbound_message(conversation.id, inbound.message_type, &inbound.content)
            .await
            .map_err(processing_failed)?;

        if !reply.content.is_empty() {
            adapter
                .send_message(&inbound.user_id, &reply.content)
                .await?;
        }
        info!(conversation_id = %conversation.id, "webhook handled");

        Ok(WebhookOutcome {
            conversation_id: conversation.id,
            reply,
        })
    }
}

fn processing_failed(report: Report<ConversationError>) -> ChannelError {
    ChannelError::ProcessingFailed {
        reason: report.current_context().to_string(),
    }
}
