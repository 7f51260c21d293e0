use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use tracing::warn;

use crate::AppState;
use crate::handlers::{HandlerError, error_response};
use crate::models::webhook::WebhookAckResponse;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Handler for POST /webhook
///
/// The body is taken as raw bytes: the signature covers the exact bytes the
/// provider sent, not a re-serialization.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAckResponse>, HandlerError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    state
        .webhook
        .handle(&body, signature)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "Webhook delivery rejected");
            error_response(e.status_code(), e.to_string())
        })
}
