//! WebSocket endpoint.
//!
//! Adapts axum's WebSocket to the transport-agnostic connection loops: the
//! outbound loop runs on its own task, the inbound loop on the upgrade task.

use crate::error::ApiError;
use crate::routes::parse_conversation_id;
use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::extract::rejection::QueryRejection;
use axum::response::Response;
use courier_conversation::{Connection, Frame, run_inbound, run_outbound};
use courier_core::{ConversationId, UserId};
use futures::{SinkExt, StreamExt, future};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Upgrades to a WebSocket bound to a user and, optionally, a conversation.
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    query: Result<Query<WsQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let user_id = UserId::new(query.user_id);
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    let conversation_id = query
        .conversation_id
        .filter(|id| !id.is_empty())
        .map(|id| parse_conversation_id(&id))
        .transpose()?;

    Ok(ws.on_upgrade(move |socket| serve_socket(state, socket, user_id, conversation_id)))
}

async fn serve_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    user_id: UserId,
    conversation_id: Option<ConversationId>,
) {
    let (connection, mailbox_tx, mailbox_rx) =
        Connection::open(user_id, conversation_id, state.mailbox_capacity);
    info!(connection_id = %connection.id(), user_id = %connection.user_id(), "websocket connected");
    state.hub.register(connection.clone(), mailbox_tx).await;

    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_ws(frame))));
    let frames = stream.map(|message| message.map(from_ws));

    let outbound = tokio::spawn(run_outbound(
        connection.clone(),
        mailbox_rx,
        sink,
        state.hub.clone(),
        state.keepalive,
    ));
    run_inbound(
        connection.clone(),
        frames,
        state.hub.clone(),
        state.service.clone(),
    )
    .await;
    let _ = outbound.await;
    info!(connection_id = %connection.id(), "websocket disconnected");
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Ping => WsMessage::Ping(Default::default()),
        Frame::Pong => WsMessage::Pong(Default::default()),
        Frame::Close => WsMessage::Close(None),
    }
}

fn from_ws(message: WsMessage) -> Frame {
    match message {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(bytes) => Frame::Text(String::from_utf8_lossy(&bytes).into_owned()),
        WsMessage::Ping(_) => Frame::Ping,
        WsMessage::Pong(_) => Frame::Pong,
        WsMessage::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_map_both_ways() {
        assert_eq!(from_ws(to_ws(Frame::Text("hi".to_string()))), Frame::Text("hi".to_string()));
        assert_eq!(from_ws(to_ws(Frame::Ping)), Frame::Ping);
        assert_eq!(from_ws(to_ws(Frame::Close)), Frame::Close);
        assert_eq!(
            from_ws(WsMessage::Binary(b"{\"type\":\"message\"}".to_vec().into())),
            Frame::Text("{\"type\":\"message\"}".to_string())
        );
    }
}
