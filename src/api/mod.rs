use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    products: Vec<String>,
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<Health> {
    Json(Health { status: "ok", products: state.config.products.clone() })
}

/// Minimal REST surface: a health check only. Everything else on the
/// wire is the websocket protocol in `ws::protocol`.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new().route("/healthz", get(health))
}
