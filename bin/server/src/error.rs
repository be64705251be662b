//! HTTP error responses.
//!
//! Domain reports are mapped to a status by their current context; the body
//! is always `{"error": message}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_channel::ChannelError;
use courier_conversation::ConversationError;
use rootcause::Report;
use serde_json::json;
use std::fmt;

/// An error returned from an HTTP handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 400: the request is missing or malformed.
    BadRequest(String),
    /// 404: the addressed resource does not exist.
    NotFound(String),
    /// 500: something upstream failed.
    Internal(String),
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(message) | Self::NotFound(message) | Self::Internal(message) => {
                message
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status(), self.message())
    }
}

impl From<Report<ConversationError>> for ApiError {
    fn from(report: Report<ConversationError>) -> Self {
        let context = report.current_context();
        match context {
            ConversationError::NotFound { .. } => Self::NotFound(context.to_string()),
            ConversationError::Validation { .. } => Self::BadRequest(context.to_string()),
            ConversationError::Upstream { .. } | ConversationError::Connection { .. } => {
                tracing::error!(error = %report, "conversation operation failed");
                Self::Internal(context.to_string())
            }
        }
    }
}

impl From<Report<ChannelError>> for ApiError {
    fn from(report: Report<ChannelError>) -> Self {
        let context = report.current_context();
        if context.is_client_error() {
            Self::BadRequest(context.to_string())
        } else {
            tracing::error!(error = %report, "webhook handling failed");
            Self::Internal(context.to_string())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}
