//! HTTP routes.
//!
//! API endpoints:
//! - POST /chat              - {query, userId} -> {response, saved}
//! - GET  /history/{userId}  - ordered HistoryEntry list
//! - GET  /healthz           - liveness probe

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chatlog_history::Gateway;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Incoming chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Outgoing chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    /// False when the exchange could not be stored.
    pub saved: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

/// Build the application router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/history/{user_id}", get(history))
        .route("/healthz", get(healthz))
        .layer(cors_layer())
        .with_state(AppState { gateway })
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "bad chat request");
            return error_response(StatusCode::BAD_REQUEST, "Invalid request payload");
        }
    };

    match state.gateway.chat(&req.user_id, &req.query).await {
        Ok(reply) => Json(ChatResponse {
            response: reply.response,
            saved: reply.saved,
        })
        .into_response(),
        Err(e) if e.is_invalid_input() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!(error = %e, "chat request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process chat request")
        }
    }
}

async fn history(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.gateway.history(&user_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) if e.is_invalid_input() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!(user_id, error = %e, "failed to read chat history");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve chat history",
            )
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
