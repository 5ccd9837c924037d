use std::sync::Arc;

use agora_shared::constants::USER_ID_HEADER;
use agora_shared::models::{DiscussionView, NewDiscussion};
use agora_shared::types::{DiscussionId, UserId};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::discussions::Discussions;
use crate::error::ServerError;
use crate::session::SessionScope;

#[derive(Clone)]
pub struct AppState {
    pub discussions: Discussions,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/discussions", get(list_discussions).post(create_discussion))
        .route("/discussions/:id", delete(delete_discussion))
        .route("/ws", get(ws_all_discussions))
        .route("/ws/discussions/:id", get(ws_single_discussion))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    channels: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        channels: state.discussions.hub().channel_count().await,
    })
}

/// The caller identity. Authentication happens upstream; the header is
/// trusted as is.
fn caller(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if user_id.is_empty() {
        return Err(ServerError::BadRequest(format!(
            "Missing '{USER_ID_HEADER}' header"
        )));
    }
    Ok(UserId::from(user_id))
}

async fn list_discussions(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<DiscussionView>>, ServerError> {
    let user_id = caller(&headers)?;
    let views = state.discussions.user_discussions(&user_id)?;
    Ok(Json(views))
}

async fn create_discussion(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(new): Json<NewDiscussion>,
) -> Result<(StatusCode, Json<DiscussionView>), ServerError> {
    let user_id = caller(&headers)?;
    let view = state.discussions.create_discussion(&user_id, new).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn delete_discussion(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    let user_id = caller(&headers)?;
    state
        .discussions
        .delete_discussion(&user_id, DiscussionId(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_all_discussions(
    headers: HeaderMap,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user_id = caller(&headers)?;
    upgrade(state, user_id, SessionScope::AllDiscussions, ws)
}

async fn ws_single_discussion(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user_id = caller(&headers)?;
    upgrade(
        state,
        user_id,
        SessionScope::SingleDiscussion(DiscussionId(id)),
        ws,
    )
}

fn upgrade(
    state: AppState,
    user_id: UserId,
    scope: SessionScope,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    state.discussions.check_access(&user_id, scope)?;

    let limits = state.discussions.settings().limits;
    Ok(ws
        .max_message_size(state.config.max_frame_size)
        .on_upgrade(move |socket| async move {
            info!(user = %user_id, ?scope, "WebSocket client connected");
            let connection = Connection::from_websocket(socket, limits);
            if let Err(e) = state.discussions.connect(user_id.clone(), scope, connection).await {
                warn!(
                    user = %user_id,
                    failures = e.errors().len(),
                    error = %e,
                    "WebSocket session ended with errors"
                );
            }
        }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::discussions::SessionSettings;
    use crate::hub::Hub;
    use crate::testing;

    fn app() -> Router {
        let config = ServerConfig::default();
        let discussions = Discussions::new(
            Hub::default(),
            testing::service(),
            SessionSettings::from(&config),
        );
        build_router(AppState {
            discussions,
            config: Arc::new(config),
        })
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_user_header() {
        let response = app()
            .oneshot(request("GET", "/discussions", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json(response).await["error"]
            .as_str()
            .unwrap()
            .contains(USER_ID_HEADER));
    }

    #[tokio::test]
    async fn test_create_list_delete() {
        let app = app();

        let body = serde_json::json!({ "participants": [{ "user_id": "bob" }] });
        let response = app
            .clone()
            .oneshot(request("POST", "/discussions", Some("alice"), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json(response).await;
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["user_id"], "alice");

        let response = app
            .clone()
            .oneshot(request("GET", "/discussions", Some("bob"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await.as_array().unwrap().len(), 1);

        let uri = format!("/discussions/{id}");
        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some("mallory"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some("bob"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("DELETE", &uri, Some("bob"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_discussion_is_bad_request() {
        let body = serde_json::json!({ "is_group": true, "name": "", "participants": [] });
        let response = app()
            .oneshot(request("POST", "/discussions", Some("alice"), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
