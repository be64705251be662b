//! Message types for conversations.

use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use courier_core::MessageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of payload a message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image (URL or channel media reference).
    Image,
    /// File reference.
    File,
    /// A command addressed to the agent.
    Command,
    /// System notice.
    System,
}

/// Who sent a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The end user.
    #[default]
    User,
    /// The agent answering on the user's behalf.
    Bot,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Bot => f.write_str("bot"),
        }
    }
}

/// A message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Payload kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Text content or media URL.
    pub content: String,
    /// Sender role.
    pub sender: Sender,
    /// ID of the sending user or agent.
    pub sender_id: String,
    /// ID of the receiving user.
    pub receiver_id: String,
    /// Channel-specific conversation ID.
    pub channel_id: String,
    /// Additional structured data.
    #[serde(default)]
    pub metadata: Metadata,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

/// The caller-supplied part of a new message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// Payload kind.
    pub message_type: MessageType,
    /// Text content or media URL.
    pub content: String,
    /// Sender role.
    pub sender: Sender,
    /// ID of the sending user or agent.
    pub sender_id: String,
    /// Additional structured data.
    pub metadata: Metadata,
}

impl NewMessage {
    /// A text message from the user.
    #[must_use]
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::User,
            ..Self::default()
        }
    }

    /// A text message from the bot.
    #[must_use]
    pub fn bot_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::Bot,
            ..Self::default()
        }
    }

    /// Sets the sender ID.
    #[must_use]
    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// Sets the message type.
    #[must_use]
    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl Message {
    /// Builds a message from a draft, addressed to `receiver_id` on `channel_id`.
    #[must_use]
    pub fn from_draft(
        draft: NewMessage,
        receiver_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            message_type: draft.message_type,
            content: draft.content,
            sender: draft.sender,
            sender_id: draft.sender_id,
            receiver_id: receiver_id.into(),
            channel_id: channel_id.into(),
            metadata: draft.metadata,
            created_at: Utc::now(),
        }
    }

    /// Returns true if the user sent this message.
    #[must_use]
    pub fn is_from_user(&self) -> bool {
        self.sender == Sender::User
    }
}
