//! Channel integration for courier.
//!
//! Messaging channels reach courier through webhooks. Each channel has a
//! [`ChannelAdapter`] that understands its payloads and can send replies; the
//! [`ChannelRegistry`] routes a webhook to its adapter and through the
//! message service.

pub mod adapter;
pub mod error;
pub mod registry;
pub mod webapi;

pub use adapter::{ChannelAdapter, ChannelType, InboundMessage, WebhookRequest};
pub use error::ChannelError;
pub use registry::{ChannelRegistry, WebhookOutcome};
pub use webapi::WebApiAdapter;
