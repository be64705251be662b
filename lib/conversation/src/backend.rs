//! Conversational backend boundary.
//!
//! The backend turns a user's message into the agent's reply. Its internals
//! (LLM, workflow, rules) live elsewhere; this crate only needs the reply.

use crate::error::BackendError;
use async_trait::async_trait;
use courier_core::ConversationId;

/// Produces replies to inbound user messages.
#[async_trait]
pub trait ConversationalBackend: Send + Sync {
    /// Returns the reply text for `content` in the given conversation.
    async fn reply(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<String, BackendError>;
}

/// Backend that acknowledges every message by echoing it.
///
/// Used when no real backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBackend;

#[async_trait]
impl ConversationalBackend for EchoBackend {
    async fn reply(
        &self,
        _conversation_id: ConversationId,
        content: &str,
    ) -> Result<String, BackendError> {
        Ok(format!("Received: {content}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_backend_acknowledges() {
        let reply = EchoBackend
            .reply(ConversationId::new(), "ping")
            .await
            .expect("echo never fails");
        assert_eq!(reply, "Received: ping");
    }
}
