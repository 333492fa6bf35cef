use std::env;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use mock_orchestrator::{app, AppState, MockOptions};
use orchestrator_client::logging;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

fn options_from_env() -> Result<MockOptions, Box<dyn std::error::Error>> {
    let mut options = MockOptions::default();
    if let Ok(ms) = env::var("MOCK_STEP_DELAY_MS") {
        options.step_delay = Duration::from_millis(ms.trim().parse()?);
    }
    if let Ok(flag) = env::var("MOCK_DISABLE_SSE") {
        options.sse_enabled = !matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(fail_at) = env::var("MOCK_FAIL_AT") {
        if !fail_at.trim().is_empty() {
            options.fail_at = Some(fail_at.trim().to_string());
        }
    }
    if let Ok(secs) = env::var("MOCK_FINISHED_JOB_TTL_SECS") {
        options.finished_job_ttl = Duration::from_secs(secs.trim().parse()?);
    }
    if let Ok(dir) = env::var("MOCK_REPORTS_DIR") {
        options.reports_dir = PathBuf::from(dir);
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let options = options_from_env()?;
    tracing::info!(?options, "mock orchestrator options");

    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = match env::var("CLIENT_URL") {
        Ok(client_url) => cors.allow_origin(client_url.parse::<HeaderValue>()?),
        Err(_) => cors.allow_origin(Any),
    };

    let app = app(AppState::new(options)).layer(cors);

    let addr = env::var("MOCK_ORCHESTRATOR_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "mock orchestrator listening");
    axum::serve(listener, app).await?;
    Ok(())
}
