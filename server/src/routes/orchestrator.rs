use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::orchestrator_handlers::{cancel_job, init_job, job_events, job_status, start_pipeline};
use crate::handlers::report_handler::download_report;
use crate::handlers::scan_handler::scan_pdf;
use crate::state::AppState;

pub fn orchestrator_routes(state: AppState) -> Router {
    Router::new()
        .route("/orchestrator/init", post(init_job))
        .route("/orchestrator/start-pipeline/{jobId}", post(start_pipeline))
        .route("/orchestrator/cancel", post(cancel_job))
        .route("/orchestrator/events", get(job_events))
        .route("/orchestrator/status", get(job_status))
        .route("/scan-pdf", post(scan_pdf))
        .route("/reports/{filename}", get(download_report))
        .with_state(state)
}
