//! Conversation sessions and live delivery for courier.
//!
//! This crate provides:
//!
//! - **Session Store**: process-local conversation cache mirrored to a
//!   durable, TTL-bound tier
//! - **Message Service**: the only writer of conversation state
//! - **Hub**: coordinator task that owns the live-connection registry and
//!   fans messages out
//! - **Connection loops**: transport-agnostic inbound/outbound protocol loops

pub mod backend;
pub mod connection;
pub mod conversation;
pub mod durable;
pub mod error;
pub mod hub;
pub mod message;
pub mod metadata;
pub mod nats;
pub mod service;
pub mod store;

pub use backend::{ConversationalBackend, EchoBackend};
pub use connection::{
    Connection, ConnectionState, DEFAULT_MAILBOX_CAPACITY, Frame, InboundEnvelope,
    KEEPALIVE_INTERVAL, MailboxReceiver, MailboxSender, run_inbound, run_outbound,
};
pub use conversation::{Conversation, DEFAULT_TITLE, TITLE_MAX_CHARS, derive_title};
pub use durable::{CONVERSATION_TTL, DurableCache, InMemoryDurableCache, conversation_key};
pub use error::{BackendError, ConversationError, DurableCacheError};
pub use hub::{DEFAULT_COMMAND_BUFFER, Hub};
pub use message::{Message, MessageType, NewMessage, Sender};
pub use metadata::{Metadata, MetadataValue};
pub use nats::{NatsCacheConfig, NatsKvCache};
pub use service::MessageService;
pub use store::{SessionStore, StoreResult};
