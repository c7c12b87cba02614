// Server module
// HTTP front door over the answer composer


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::answer::{AnswerComposer, RagRequest, RagResponse};
use crate::config::ServerConfig;
use crate::corpus::{SavedChatSummary, list_saved_chats};

/// Shared state handed to every request
#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<AnswerComposer>,
    pub chat_dir: PathBuf,
}

/// Routes plus CORS and request tracing
#[inline]
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/rag", post(rag))
        .route("/health", get(health))
        .route("/chats", get(chats))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin without credentials, or an explicit list with credentials
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .max_age(Duration::from_secs(3600));

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        cors.allow_origin(origins)
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    }
}

async fn rag(
    State(state): State<AppState>,
    payload: Result<Json<RagRequest>, JsonRejection>,
) -> Json<RagResponse> {
    let response = match payload {
        Ok(Json(request)) => state.composer.handle(&request).await,
        Err(rejection) => {
            warn!("Rejected /rag body: {}", rejection.body_text());
            RagResponse::error(rejection.body_text())
        }
    };

    Json(response)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chats(State(state): State<AppState>) -> Json<Vec<SavedChatSummary>> {
    Json(list_saved_chats(&state.chat_dir))
}

/// Load the index, then serve until the process is stopped
///
/// An index that cannot be loaded is fatal.
#[inline]
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    state
        .composer
        .retriever()
        .initialize()
        .await
        .context("Failed to load the index")?;

    let app = build_router(state, &config.allowed_origins);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}
