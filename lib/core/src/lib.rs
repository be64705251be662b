//! Core domain types and utilities for courier.
//!
//! This crate provides the identifiers and error handling shared by the
//! conversation, channel and server crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ConnectionId, ConversationId, MessageId, ParseIdError, UserId};
