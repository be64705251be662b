//! courier HTTP and WebSocket server.
//!
//! Exposes the conversation API, the live WebSocket endpoint and channel
//! webhooks over axum.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::router;
pub use state::AppState;
