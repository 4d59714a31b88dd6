// HTTP surface: inbound webhooks, delivery replay, health

pub mod inbound;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::engine::dispatch::ActionDispatcher;
use crate::engine::outbox::DeliveryWorker;
use crate::engine::stage_actions::StageActionEngine;
use crate::engine::storage::EngineStore;
use crate::EngineError;

use inbound::inbound_webhook;

/// Shared handler state. Everything is behind an `Arc` so the router
/// clones are cheap.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn EngineStore>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub stage_engine: Arc<StageActionEngine>,
    pub delivery_worker: Arc<DeliveryWorker>,
}

/// Build the public router. CORS is permissive; authentication happens
/// per-route (the inbound hook checks its API key itself).
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/hooks/inbound", post(inbound_webhook))
        .route("/v1/deliveries/:id/replay", post(replay_delivery))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// Reset a failed or dead-lettered delivery to pending.
async fn replay_delivery(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<Value>) {
    match state.delivery_worker.replay(id, Utc::now()).await {
        Ok(()) => (StatusCode::OK, Json(json!({"replayed": true, "delivery_id": id}))),
        Err(err) => error_response(err),
    }
}

/// Map engine errors onto HTTP statuses with a JSON error body.
pub(crate) fn error_response(err: EngineError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        EngineError::InvalidInput(_) | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}
