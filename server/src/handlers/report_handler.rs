// server/src/handlers/report_handler.rs
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};

use super::{detail, ApiError};
use crate::state::AppState;

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != ".."
}

/// GET /api/reports/{filename}
pub async fn download_report(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_plain_file_name(&filename) {
        return Err(detail(StatusCode::BAD_REQUEST, "Invalid filename"));
    }

    let path = state.options.reports_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(detail(StatusCode::NOT_FOUND, "Report not found"));
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "could not read report");
            return Err(detail(StatusCode::INTERNAL_SERVER_ERROR, "Could not read report"));
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((headers, bytes))
}
