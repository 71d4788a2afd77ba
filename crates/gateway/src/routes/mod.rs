//! HTTP route table.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use crate::state::GatewayState;

pub mod chats;
pub mod groups;
pub mod misc;
pub mod sessions;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health))
        .nest("/sessions", sessions::router())
        .nest("/chats", chats::router())
        .nest("/groups", groups::router())
        .nest("/misc", misc::router())
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "sessions": state.manager.list().len(),
    }))
}
