//! Conversation records.

use crate::message::{Message, Sender};
use crate::metadata::Metadata;
use chrono::{DateTime, Utc};
use courier_core::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// Title given to a conversation before any user message arrives.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Maximum length of a derived title, in characters.
pub const TITLE_MAX_CHARS: usize = 50;

/// A thread of messages between one user and one agent/channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier. Immutable.
    pub id: ConversationId,
    /// The user who owns this conversation.
    pub user_id: UserId,
    /// Agent answering in this conversation, if any.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Originating channel type (e.g. "webapi", "wechat").
    #[serde(default)]
    pub channel: String,
    /// Channel-specific conversation ID.
    #[serde(default)]
    pub channel_id: String,
    /// Display title.
    pub title: String,
    /// Set once the title was chosen explicitly; derivation no longer applies.
    #[serde(default)]
    pub title_pinned: bool,
    /// Messages in append order.
    pub messages: Vec<Message>,
    /// Free-form conversation context.
    #[serde(default)]
    pub context: Metadata,
    /// Content of the most recent message.
    #[serde(default)]
    pub last_message: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// When the conversation last changed.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Creates an empty conversation.
    #[must_use]
    pub fn new(
        user_id: UserId,
        agent_id: Option<String>,
        channel: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            user_id,
            agent_id,
            channel: channel.into(),
            channel_id: channel_id.into(),
            title: DEFAULT_TITLE.to_string(),
            title_pinned: false,
            messages: Vec::new(),
            context: Metadata::new(),
            last_message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends a message and updates the summary fields.
    ///
    /// The first user message names the conversation unless the title was
    /// set explicitly.
    pub fn append(&mut self, message: Message) {
        let first_from_user = message.sender == Sender::User
            && !self.messages.iter().any(Message::is_from_user);

        if first_from_user && !self.title_pinned {
            self.title = derive_title(&message.content);
        }

        self.last_message.clone_from(&message.content);
        self.updated_at = message.created_at.max(self.updated_at);
        self.messages.push(message);
    }

    /// Sets the title explicitly.
    pub fn rename(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.title_pinned = true;
        self.updated_at = Utc::now();
    }

    /// Returns a window of messages without ever indexing out of range.
    ///
    /// `offset` is clamped to the message count; a `limit` of zero or less,
    /// or one reaching past the end, returns everything from `offset` on.
    #[must_use]
    pub fn page(&self, limit: i64, offset: i64) -> &[Message] {
        let len = self.messages.len();
        let start = usize::try_from(offset.max(0)).unwrap_or(usize::MAX).min(len);
        let remaining = len - start;
        let take = match usize::try_from(limit) {
            Ok(limit) if limit > 0 && limit < remaining => limit,
            _ => remaining,
        };
        &self.messages[start..start + take]
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Derives a title from message content, truncating to [`TITLE_MAX_CHARS`].
#[must_use]
pub fn derive_title(content: &str) -> String {
    if content.chars().count() <= TITLE_MAX_CHARS {
        return content.to_string();
    }
    let mut title: String = content.chars().take(TITLE_MAX_CHARS - 1).collect();
    title.push('…');
    title
}
