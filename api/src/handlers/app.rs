use axum::{routing, Router};

use super::analysis;
use crate::AppState;

pub fn add_routes(router: Router<AppState>, state: AppState) -> Router {
    router
        .route("/", routing::get(health))
        .route("/health", routing::get(health))
        .route(
            "/analysis",
            routing::post(analysis::post).get(analysis::get_status),
        )
        .with_state(state)
}

pub async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let database = state.store.healthy().await;
    let expanse = state.adapter.healthy().await;
    axum::Json(serde_json::json!({"database": database, "expanse": expanse}))
}
