use agora_shared::{ChatError, ErrorKind};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err.kind() {
            ErrorKind::Validation => ServerError::BadRequest(err.to_string()),
            ErrorKind::Permission => ServerError::Forbidden(err.to_string()),
            ErrorKind::NotFound => ServerError::NotFound(err.to_string()),
            ErrorKind::ConnectionClosed | ErrorKind::Downstream => {
                ServerError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use agora_shared::types::DiscussionId;

    use super::*;

    #[test]
    fn test_chat_errors_map_to_status() {
        let status = |e: ChatError| ServerError::from(e).into_response().status();

        assert_eq!(status(ChatError::InvalidMessage), StatusCode::BAD_REQUEST);
        assert_eq!(status(ChatError::NothingToUpdate), StatusCode::BAD_REQUEST);
        assert_eq!(status(ChatError::NoPermission), StatusCode::FORBIDDEN);
        assert_eq!(
            status(ChatError::DiscussionNotFound(DiscussionId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(ChatError::Repository("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
