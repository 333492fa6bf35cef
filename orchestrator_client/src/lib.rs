pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod sse;
pub mod state;
pub mod steps;
pub mod transport;
pub mod wire;

mod poller;
mod stream;

#[cfg(test)]
mod testing;

pub use api::{HttpOrchestratorApi, OrchestratorApi};
pub use config::ClientConfig;
pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use state::OrchestratorView;
pub use steps::{ProcessStep, StepStatus};
pub use wire::{PipelineFlags, RunSource};
