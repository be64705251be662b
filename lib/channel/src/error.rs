//! Error types for the channel crate.

use std::fmt;

/// Errors from channel adapters and webhook routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No adapter is registered for the channel type.
    UnsupportedChannel { channel_type: String },
    /// The webhook payload could not be understood.
    InvalidPayload { reason: String },
    /// The conversation side failed while handling the message.
    ProcessingFailed { reason: String },
    /// The reply could not be delivered back through the channel.
    DeliveryFailed { channel_type: String, reason: String },
}

impl ChannelError {
    /// Shorthand for an invalid payload.
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Returns true if the caller sent something this service cannot accept.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedChannel { .. } | Self::InvalidPayload { .. }
        )
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedChannel { channel_type } => {
                write!(f, "unsupported channel type: {channel_type}")
            }
            Self::InvalidPayload { reason } => write!(f, "invalid webhook payload: {reason}"),
            Self::ProcessingFailed { reason } => write!(f, "message processing failed: {reason}"),
            Self::DeliveryFailed {
                channel_type,
                reason,
            } => write!(f, "delivery via {channel_type} failed: {reason}"),
        }
    }
}

impl std::error::Error for ChannelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors() {
        assert!(
            ChannelError::UnsupportedChannel {
                channel_type: "fax".to_string()
            }
            .is_client_error()
        );
        assert!(ChannelError::invalid_payload("empty").is_client_error());
        assert!(
            !ChannelError::ProcessingFailed {
                reason: "down".to_string()
            }
            .is_client_error()
        );
    }

    #[test]
    fn display_names_the_channel() {
        let err = ChannelError::DeliveryFailed {
            channel_type: "telegram".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "delivery via telegram failed: timeout");
    }
}
