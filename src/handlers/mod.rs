pub mod health;
pub mod product;
pub mod webhook;

use axum::{Json, http::StatusCode};

use crate::models::response::ErrorResponse;

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}
