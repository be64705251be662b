//! HTTP routes for conversations, messages, webhooks and health.

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use courier_channel::WebhookRequest;
use courier_conversation::{Metadata, MessageType, NewMessage, Sender};
use courier_core::{ConversationId, UserId};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Page size when `limit` is not given.
const DEFAULT_PAGE_SIZE: i64 = 50;

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/{id}/title", patch(rename_conversation))
        .route("/conversations/{id}/messages", get(get_messages))
        .route("/messages", post(send_message))
        .route("/ws", get(ws::upgrade))
        .route("/webhooks/{channel_type}", post(webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parses a conversation ID from a path or query.
///
/// An unparseable ID cannot name an existing conversation, so it is reported
/// as not found.
pub(crate) fn parse_conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("conversation not found: {raw}")))
}

/// Body of `POST /conversations`.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    channel_id: String,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    let agent_id = request.agent_id.filter(|id| !id.is_empty());
    let conversation = state
        .service
        .create_conversation(
            UserId::new(request.user_id),
            agent_id,
            &request.channel,
            &request.channel_id,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_conversation_id(&id)?;
    let conversation = state.service.get_conversation(id).await?;
    Ok(Json(conversation))
}

/// Query of `GET /conversations`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    user_id: String,
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let user_id = UserId::new(query.user_id);
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(Json(state.service.list_conversations(&user_id).await))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Deleting something that cannot exist is still a successful no-op.
    if let Ok(id) = id.parse::<ConversationId>() {
        state.service.delete_conversation(id).await;
    }
    Ok(Json(json!({ "message": "deleted" })))
}

/// Body of `PATCH /conversations/{id}/title`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    title: String,
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_conversation_id(&id)?;
    let Json(request) = body?;
    let conversation = state
        .service
        .rename_conversation(id, &request.title)
        .await?;
    Ok(Json(conversation))
}

/// Body of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    conversation_id: String,
    #[serde(rename = "type", default)]
    message_type: MessageType,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sender: Sender,
    #[serde(default)]
    sender_id: String,
    #[serde(default)]
    metadata: Metadata,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    if request.conversation_id.is_empty() {
        return Err(ApiError::BadRequest(
            "conversation_id is required".to_string(),
        ));
    }
    let id = parse_conversation_id(&request.conversation_id)?;

    let draft = NewMessage {
        message_type: request.message_type,
        content: request.content,
        sender: request.sender,
        sender_id: request.sender_id,
        metadata: request.metadata,
    };
    let message = state.service.send_message(id, draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Query of `GET /conversations/{id}/messages`.
///
/// Values are kept raw: a present but unparseable number reads as zero, so
/// paging never fails on a bad query.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    limit: Option<String>,
    offset: Option<String>,
}

impl PageQuery {
    fn limit(&self) -> i64 {
        lenient(self.limit.as_deref(), DEFAULT_PAGE_SIZE)
    }

    fn offset(&self) -> i64 {
        lenient(self.offset.as_deref(), 0)
    }
}

fn lenient(raw: Option<&str>, absent: i64) -> i64 {
    raw.map_or(absent, |value| value.trim().parse().unwrap_or(0))
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_conversation_id(&id)?;
    let Query(page) = query?;
    let messages = state
        .service
        .get_messages(id, page.limit(), page.offset())
        .await?;
    Ok(Json(messages))
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(channel_type): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = WebhookRequest {
        query,
        body: body.to_vec(),
    };
    let outcome = state
        .channels
        .handle_webhook(&state.service, &channel_type, &request)
        .await?;
    Ok(Json(json!({
        "status": "ok",
        "conversation_id": outcome.conversation_id,
    })))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let online_users = state.hub.online_users().await.len();
    let connections = state.hub.connection_count().await;
    Json(json!({
        "status": "ok",
        "online_users": online_users,
        "connections": connections,
    }))
}
