use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::AppState;

/// Handler for GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "chains": state.chains.chain_ids(),
    }))
}
