//! Shared application state.

use courier_channel::ChannelRegistry;
use courier_conversation::{Hub, MessageService};
use std::sync::Arc;
use std::time::Duration;

/// State shared by every handler.
pub struct AppState {
    /// Conversation operations.
    pub service: Arc<MessageService>,
    /// Live-connection hub.
    pub hub: Hub,
    /// Webhook adapters.
    pub channels: ChannelRegistry,
    /// Outbound mailbox capacity for new WebSocket connections.
    pub mailbox_capacity: usize,
    /// Keep-alive interval for WebSocket connections.
    pub keepalive: Duration,
}

impl AppState {
    /// Creates application state.
    pub fn new(
        service: Arc<MessageService>,
        hub: Hub,
        channels: ChannelRegistry,
        mailbox_capacity: usize,
        keepalive: Duration,
    ) -> Self {
        Self {
            service,
            hub,
            channels,
            mailbox_capacity,
            keepalive,
        }
    }
}
