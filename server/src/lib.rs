pub mod handlers;
pub mod pipeline;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use state::{AppState, MockOptions};

pub fn app(state: AppState) -> Router {
    Router::new().nest("/api", routes::orchestrator::orchestrator_routes(state))
}

/// Serves the mock on an already bound listener in the background.
pub fn spawn(listener: TcpListener, state: AppState) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app(state)).await {
            tracing::error!(error = %e, "mock orchestrator stopped");
        }
    });
    Ok((addr, handle))
}
