//! Channel adapter trait and related types.
//!
//! Every messaging channel (web API, chat platforms) implements
//! [`ChannelAdapter`], turning its webhook payloads into [`InboundMessage`]s
//! and delivering replies back to its users.

use crate::error::ChannelError;
use async_trait::async_trait;
use courier_conversation::MessageType;
use courier_core::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Known channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Courier's own HTTP/WebSocket API.
    WebApi,
    /// Feishu (Lark) bot events.
    Feishu,
    /// Telegram Bot API updates.
    Telegram,
    /// Discord interactions.
    Discord,
    /// WhatsApp Business webhooks.
    WhatsApp,
    /// WeChat official account messages.
    WeChat,
    /// Signal messenger bridge.
    Signal,
}

impl ChannelType {
    /// The wire name used in routes and stored conversations.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebApi => "webapi",
            Self::Feishu => "feishu",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::WhatsApp => "whatsapp",
            Self::WeChat => "wechat",
            Self::Signal => "signal",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webapi" => Ok(Self::WebApi),
            "feishu" => Ok(Self::Feishu),
            "telegram" => Ok(Self::Telegram),
            "discord" => Ok(Self::Discord),
            "whatsapp" => Ok(Self::WhatsApp),
            "wechat" => Ok(Self::WeChat),
            "signal" => Ok(Self::Signal),
            other => Err(ChannelError::UnsupportedChannel {
                channel_type: other.to_string(),
            }),
        }
    }
}

/// A webhook call as received over HTTP.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Query string parameters.
    pub query: BTreeMap<String, String>,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl WebhookRequest {
    /// A request with only a body.
    #[must_use]
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            query: BTreeMap::new(),
            body: body.into(),
        }
    }
}

/// A message normalised from a channel's own format.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// The channel it arrived on.
    pub channel: ChannelType,
    /// Payload kind.
    pub message_type: MessageType,
    /// Text content or media URL.
    pub content: String,
    /// The sending user, in the channel's namespace.
    pub user_id: UserId,
    /// Channel-specific conversation ID.
    pub channel_id: String,
}

/// Trait for channel adapters.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter serves.
    fn channel_type(&self) -> ChannelType;

    /// Parses a webhook call into a message.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if the request is not a message this adapter
    /// understands.
    fn parse_webhook(&self, request: &WebhookRequest) -> Result<InboundMessage, ChannelError>;

    /// Delivers `text` to `user_id` through the channel.
    ///
    /// # Errors
    ///
    /// `DeliveryFailed` if the channel rejected or could not take the message.
    async fn send_message(&self, user_id: &UserId, text: &str) -> Result<(), ChannelError>;
}
