// server/src/handlers/scan_handler.rs
use axum::{extract::Multipart, http::StatusCode, Json};
use orchestrator_client::wire::ScanResponse;
use serde_json::json;

use super::{detail, ApiError};

/// POST /api/scan-pdf
///
/// Accepts the `pdf` multipart field. Nothing is parsed; the response only
/// echoes what was received so clients can exercise the upload path.
pub async fn scan_pdf(mut multipart: Multipart) -> Result<Json<ScanResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| detail(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("pdf") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if !file_name.to_lowercase().ends_with(".pdf") {
            return Err(detail(StatusCode::BAD_REQUEST, "Only PDF files are supported."));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| detail(StatusCode::BAD_REQUEST, e.to_string()))?;
        tracing::info!(%file_name, size = bytes.len(), "pdf received");

        return Ok(Json(ScanResponse {
            inserted: Vec::new(),
            parsed_rows: vec![json!({ "file_name": file_name, "bytes": bytes.len() })],
            raw_text_len: bytes.len(),
        }));
    }

    Err(detail(StatusCode::BAD_REQUEST, "Missing 'pdf' file field."))
}
