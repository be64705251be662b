//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `DurableCacheError`: failures of the remote, TTL-bound cache tier
//! - `BackendError`: failures of the conversational backend
//! - `ConversationError`: what service callers see, wrapped in a `Report`

use std::fmt;

/// High-level conversation errors.
///
/// Every fallible store and service operation reports one of these as its
/// current context; the HTTP layer maps them to status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The conversation is absent from both cache tiers.
    NotFound { id: String },
    /// A required field is missing or malformed.
    Validation { reason: String },
    /// The durable tier or the conversational backend failed.
    Upstream { reason: String },
    /// A transport read or write failed.
    Connection { reason: String },
}

impl ConversationError {
    /// Shorthand for a not-found error on a conversation ID.
    pub fn not_found(id: impl ToString) -> Self {
        Self::NotFound { id: id.to_string() }
    }

    /// Shorthand for a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "conversation not found: {id}"),
            Self::Validation { reason } => write!(f, "invalid request: {reason}"),
            Self::Upstream { reason } => write!(f, "upstream failure: {reason}"),
            Self::Connection { reason } => write!(f, "connection failure: {reason}"),
        }
    }
}

impl std::error::Error for ConversationError {}

/// Errors from the durable cache tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableCacheError {
    /// The cache could not be reached or set up.
    ConnectionFailed { message: String },
    /// A read, write or delete failed.
    OperationFailed { key: String, message: String },
    /// A stored value could not be encoded or decoded.
    Serialization { key: String, message: String },
}

impl fmt::Display for DurableCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "durable cache connection failed: {message}")
            }
            Self::OperationFailed { key, message } => {
                write!(f, "durable cache operation on '{key}' failed: {message}")
            }
            Self::Serialization { key, message } => {
                write!(f, "durable cache value '{key}' is malformed: {message}")
            }
        }
    }
}

impl std::error::Error for DurableCacheError {}

/// Errors from the conversational backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend is not reachable.
    Unavailable { message: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "backend unavailable: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_error_display() {
        let err = ConversationError::not_found("conv_123");
        assert!(err.to_string().contains("conversation not found"));
        assert!(err.to_string().contains("conv_123"));
    }

    #[test]
    fn durable_error_display() {
        let err = DurableCacheError::OperationFailed {
            key: "conversation:conv_1".to_string(),
            message: "timeout".to_string(),
        };
        assert!(err.to_string().contains("conversation:conv_1"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::Unavailable {
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }
}
