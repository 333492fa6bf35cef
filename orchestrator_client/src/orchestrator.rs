//! Orchestrator facade: starts runs, cancels them and downloads the report.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{HttpOrchestratorApi, OrchestratorApi};
use crate::config::ClientConfig;
use crate::error::{OrchestratorError, Result};
use crate::state::{OrchestratorView, Shared};
use crate::transport;
use crate::wire::{RunSource, StartPipelineRequest};
use crate::{poller, stream};

/// Everything a background task needs to act on behalf of one run.
pub(crate) struct RunContext<A> {
    pub shared: Arc<Shared<A>>,
    pub generation: u64,
    pub job_id: String,
    pub token: CancellationToken,
}

impl<A> Clone for RunContext<A> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            generation: self.generation,
            job_id: self.job_id.clone(),
            token: self.token.clone(),
        }
    }
}

pub struct Orchestrator<A = HttpOrchestratorApi> {
    shared: Arc<Shared<A>>,
}

impl Orchestrator<HttpOrchestratorApi> {
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let api = HttpOrchestratorApi::new(&config)?;
        Ok(Self::new(api, config))
    }
}

impl<A: OrchestratorApi> Orchestrator<A> {
    pub fn new(api: A, config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(Arc::new(api), config)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorView> {
        self.shared.subscribe()
    }

    pub fn view(&self) -> OrchestratorView {
        self.shared.snapshot()
    }

    /// Uploads a curriculum PDF, then runs the pipeline on it.
    /// Returns the job id once the backend acknowledged the start.
    pub async fn start_from_pdf(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            return Err(OrchestratorError::InvalidInput(format!(
                "{} is not a PDF file",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("curriculum.pdf")
            .to_string();

        let (generation, token) = self.begin_run()?;
        let shared = self.shared.clone();
        let path = path.to_path_buf();
        let setup = async move {
            let bytes = tokio::fs::read(&path).await?;
            tracing::info!(file = %file_name, size = bytes.len(), "uploading curriculum PDF");
            let scanned = shared.api.scan_pdf(&file_name, bytes).await?;
            tracing::info!(parsed_rows = scanned.parsed_rows.len(), "curriculum PDF scanned");
            Ok::<(), OrchestratorError>(())
        };
        self.guarded(generation, &token, setup).await?;

        self.launch(generation, token, RunSource::Pdf).await
    }

    /// Runs the pipeline on curriculum data the backend already stores.
    pub async fn start_from_stored(&self) -> Result<String> {
        let (generation, token) = self.begin_run()?;
        self.launch(generation, token, RunSource::Stored).await
    }

    /// Drops the current run locally right away, then asks the backend to
    /// cancel the job. The backend request is fire-and-forget.
    pub fn cancel(&self) {
        let job_id = self.shared.update(|state| {
            let job_id = state.job_id.clone();
            state.reset();
            job_id
        });

        let Some(job_id) = job_id else {
            return;
        };
        tracing::info!(%job_id, "run cancelled");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let api = self.shared.api.clone();
                handle.spawn(async move {
                    if let Err(e) = api.cancel_job(&job_id).await {
                        tracing::warn!(%job_id, error = %e, "backend cancel request failed");
                    }
                });
            }
            Err(_) => tracing::warn!(%job_id, "no runtime available, backend cancel skipped"),
        }
    }

    /// Waits until the current run stops processing and returns its view.
    pub async fn wait_until_settled(&self) -> OrchestratorView {
        self.wait_for(|view| !view.is_processing).await
    }

    /// Waits until no report download is in flight.
    pub async fn wait_for_download(&self) -> OrchestratorView {
        self.wait_for(|view| !view.download_in_flight).await
    }

    async fn wait_for(&self, done: impl Fn(&OrchestratorView) -> bool) -> OrchestratorView {
        let mut rx = self.subscribe();
        loop {
            let view = rx.borrow_and_update().clone();
            if done(&view) {
                return view;
            }
            if rx.changed().await.is_err() {
                return view;
            }
        }
    }

    fn begin_run(&self) -> Result<(u64, CancellationToken)> {
        self.shared.update(|state| {
            if state.is_processing {
                return Err(OrchestratorError::AlreadyRunning {
                    job_id: state.job_id.clone().unwrap_or_else(|| "pending".to_string()),
                });
            }
            state.reset();
            state.is_processing = true;
            Ok((state.generation, state.token.clone()))
        })
    }

    /// Init, stream, start, poll.
    async fn launch(&self, generation: u64, token: CancellationToken, source: RunSource) -> Result<String> {
        let job_id = self.guarded(generation, &token, self.shared.api.init_job()).await?;
        self.shared.update_run(generation, |state| state.job_id = Some(job_id.clone()));
        tracing::info!(%job_id, %source, "job initialized");

        let run = RunContext {
            shared: self.shared.clone(),
            generation,
            job_id: job_id.clone(),
            token: token.clone(),
        };

        let opened = stream::spawn(run.clone());
        let grace = self.shared.config.stream_open_grace;
        match tokio::time::timeout(grace, opened).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::debug!(%job_id, "event stream did not open"),
            Err(_) => tracing::debug!(%job_id, ?grace, "event stream still opening after grace period"),
        }

        let request = StartPipelineRequest {
            source,
            flags: self.shared.config.flags,
        };
        self.guarded(generation, &token, self.shared.api.start_pipeline(&job_id, &request))
            .await?;
        tracing::info!(%job_id, flags = ?request.flags, "pipeline started");

        poller::spawn(run);
        Ok(job_id)
    }

    /// Awaits a setup call, aborting on cancellation and failing the run on error.
    async fn guarded<T>(
        &self,
        generation: u64,
        token: &CancellationToken,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(OrchestratorError::Cancelled),
            outcome = call => outcome,
        };

        outcome.map_err(|e| {
            tracing::error!(error = %e, "pipeline run aborted");
            self.shared.update_run(generation, |state| {
                state.token.cancel();
                state.is_processing = false;
                state.last_error = Some(e.to_string());
            });
            e
        })
    }
}

/// Downloads the finished report in the background.
pub(crate) fn spawn_download<A: OrchestratorApi>(shared: Arc<Shared<A>>, generation: u64, report_url: String) {
    tokio::spawn(async move {
        match download_report(&shared, &report_url).await {
            Ok(path) => {
                shared.update_run(generation, |state| state.report_path = Some(path));
            }
            Err(e) => {
                tracing::warn!(%report_url, error = %e, "report download failed");
                shared.update_run(generation, |state| state.download_started = false);
            }
        }
    });
}

async fn download_report<A: OrchestratorApi>(shared: &Shared<A>, report_url: &str) -> Result<std::path::PathBuf> {
    let config = &shared.config;
    let url = shared.api.resolve_report_url(report_url)?;

    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.probe_interval)
        .with_max_interval(config.probe_interval)
        .with_multiplier(1.0)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build();

    let max_attempts = config.probe_attempts.max(1);
    let mut attempts = 0u32;
    retry(backoff, || {
        attempts += 1;
        let attempt = attempts;
        let api = shared.api.clone();
        let url = url.clone();
        async move {
            if api.probe_report(&url).await {
                return Ok(());
            }
            tracing::debug!(url = %url, attempt, "report not reachable yet");
            let err = OrchestratorError::ReportUnavailable {
                url: url.to_string(),
                attempts: attempt,
            };
            if attempt >= max_attempts {
                Err(backoff::Error::permanent(err))
            } else {
                Err(backoff::Error::transient(err))
            }
        }
    })
    .await?;

    let bytes = shared.api.fetch_report(&url).await?;
    transport::write_report(&config.download_dir, &transport::report_file_name(&url), &bytes).await
}
