//! Adapter for courier's own JSON web API.

use crate::adapter::{ChannelAdapter, ChannelType, InboundMessage, WebhookRequest};
use crate::error::ChannelError;
use async_trait::async_trait;
use courier_conversation::MessageType;
use courier_core::UserId;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct WebApiPayload {
    #[serde(rename = "type", default)]
    message_type: MessageType,
    content: String,
    user_id: String,
    #[serde(default)]
    channel_id: Option<String>,
}

/// Adapter for clients posting JSON to the webhook endpoint.
///
/// Web API users read replies over their WebSocket connections, which the
/// message service already feeds, so [`ChannelAdapter::send_message`] has
/// nothing left to deliver.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebApiAdapter;

#[async_trait]
impl ChannelAdapter for WebApiAdapter {
    fn channel_type(&self) -> ChannelType {
        ChannelType::WebApi
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> Result<InboundMessage, ChannelError> {
        let payload: WebApiPayload = serde_json::from_slice(&request.body)
            .map_err(|e| ChannelError::invalid_payload(e.to_string()))?;

        let user_id = UserId::new(payload.user_id);
        if user_id.is_empty() {
            return Err(ChannelError::invalid_payload("user_id is required"));
        }
        if payload.content.trim().is_empty() {
            return Err(ChannelError::invalid_payload("content is required"));
        }

        let channel_id = payload
            .channel_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| user_id.as_str().to_string());

        Ok(InboundMessage {
            channel: ChannelType::WebApi,
            message_type: payload.message_type,
            content: payload.content,
            user_id,
            channel_id,
        })
    }

    async fn send_message(&self, user_id: &UserId, text: &str) -> Result<(), ChannelError> {
        debug!(user_id = %user_id, len = text.len(), "web API reply delivered over live connections");
        Ok(())
    }
}
