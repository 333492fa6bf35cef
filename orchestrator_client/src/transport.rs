//! URL handling, reachability probing and report file helpers.

use std::path::{Path, PathBuf};

use reqwest::Client;
use url::Url;

use crate::error::{OrchestratorError, Result};

/// Normalizes a user supplied API base URL.
///
/// Adds `http://` when no scheme is given and guarantees a trailing slash so
/// that relative endpoint paths keep any path prefix of the base.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(OrchestratorError::InvalidUrl {
            url: raw.to_string(),
            message: "empty base URL".to_string(),
        });
    }

    let with_scheme = if trimmed.contains("://") {
        format!("{}/", trimmed)
    } else {
        format!("http://{}/", trimmed)
    };

    let url = Url::parse(&with_scheme).map_err(|e| OrchestratorError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(OrchestratorError::InvalidUrl {
            url: raw.to_string(),
            message: format!("unsupported scheme {}", other),
        }),
    }
}

/// Joins an API path such as `/api/orchestrator/init` onto the base URL.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| OrchestratorError::InvalidUrl {
            url: path.to_string(),
            message: e.to_string(),
        })
}

/// Like [`endpoint`], with one trailing path segment percent-encoded.
pub fn endpoint_with_segment(base: &Url, path: &str, segment: &str) -> Result<Url> {
    let mut url = endpoint(base, path)?;
    let url_string = url.to_string();
    url.path_segments_mut()
        .map_err(|_| OrchestratorError::InvalidUrl {
            url: url_string,
            message: "URL cannot take path segments".to_string(),
        })?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Turns a report URL from the backend into an absolute URL.
pub fn resolve_report_url(base: &Url, report_url: &str) -> Result<Url> {
    match Url::parse(report_url) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => endpoint(base, report_url),
        Err(e) => Err(OrchestratorError::InvalidUrl {
            url: report_url.to_string(),
            message: e.to_string(),
        }),
    }
}

/// File name to save a report under: the last path segment, or `report.pdf`.
pub fn report_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| "report.pdf".to_string())
}

/// One reachability check: `true` when a GET answers with a success status.
pub async fn is_reachable(client: &Client, url: &Url) -> bool {
    match client.get(url.clone()).send().await {
        Ok(res) => res.status().is_success(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "reachability probe failed");
            false
        }
    }
}

/// Writes the downloaded report into `dir`, creating it when needed.
pub async fn write_report(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    tracing::info!(path = %path.display(), size = bytes.len(), "report saved");
    Ok(path)
}
