pub mod admin;
pub mod webhook;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/admin", admin::router())
        .nest("/webhook", webhook::router())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
