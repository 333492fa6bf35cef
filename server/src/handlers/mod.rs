pub mod orchestrator_handlers;
pub mod report_handler;
pub mod scan_handler;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error shape shared by all handlers: `{"detail": ...}` with a status code.
pub type ApiError = (StatusCode, Json<Value>);

pub fn detail(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "detail": message.into() })))
}
