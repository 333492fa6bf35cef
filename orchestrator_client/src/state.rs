//! Run state shared by the facade, the stream task and the poll task.
//!
//! Every mutation happens under one mutex and is followed by a fresh
//! [`OrchestratorView`] on the watch channel. Updates tagged with an older
//! run generation are dropped, so tasks of a cancelled run cannot touch the
//! next one.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::OrchestratorApi;
use crate::config::ClientConfig;
use crate::steps::{Channel, ProcessStep, StepBoard, StepStatus};
use crate::wire::{StatusSnapshot, StreamMessage};

/// What a UI or CLI renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorView {
    pub steps: Vec<ProcessStep>,
    pub is_processing: bool,
    pub is_complete: bool,
    pub report_url: Option<String>,
    pub job_id: Option<String>,
    pub last_error: Option<String>,
    pub report_path: Option<PathBuf>,
    pub download_in_flight: bool,
}

pub(crate) struct RunState {
    pub generation: u64,
    revision: u64,
    board: StepBoard,
    pub is_processing: bool,
    pub is_complete: bool,
    pub report_url: Option<String>,
    pub job_id: Option<String>,
    pub last_error: Option<String>,
    pub report_path: Option<PathBuf>,
    pub download_started: bool,
    pub token: CancellationToken,
}

impl RunState {
    fn new() -> Self {
        Self {
            generation: 0,
            revision: 0,
            board: StepBoard::new(),
            is_processing: false,
            is_complete: false,
            report_url: None,
            job_id: None,
            last_error: None,
            report_path: None,
            download_started: false,
            token: CancellationToken::new(),
        }
    }

    fn view(&self) -> OrchestratorView {
        OrchestratorView {
            steps: self.board.steps().to_vec(),
            is_processing: self.is_processing,
            is_complete: self.is_complete,
            report_url: self.report_url.clone(),
            job_id: self.job_id.clone(),
            last_error: self.last_error.clone(),
            report_path: self.report_path.clone(),
            download_in_flight: self.download_started && self.report_path.is_none(),
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Clears everything that belongs to a run and starts a new generation.
    pub fn reset(&mut self) {
        self.token.cancel();
        self.generation += 1;
        self.board.reset();
        self.is_processing = false;
        self.is_complete = false;
        self.report_url = None;
        self.job_id = None;
        self.last_error = None;
        self.report_path = None;
        self.download_started = false;
        self.token = CancellationToken::new();
    }

    /// Returns whether the update carried a report URL.
    fn record_report_url(&mut self, url: Option<String>) -> bool {
        match url {
            Some(url) => {
                self.report_url = Some(url);
                true
            }
            None => false,
        }
    }

    /// Settles the run once the final stage completed or any stage failed.
    /// Returns `true` only for the update that completed the run.
    fn settle(&mut self) -> bool {
        if !self.is_complete && self.board.is_finished() {
            self.is_complete = true;
            self.is_processing = false;
            tracing::info!(job_id = ?self.job_id, report_url = ?self.report_url, "pipeline completed");
            return true;
        }
        if self.is_processing && !self.is_complete {
            if let Some(failed) = self
                .board
                .steps()
                .iter()
                .find(|s| s.status == StepStatus::Error)
            {
                self.is_processing = false;
                if self.last_error.is_none() {
                    self.last_error = Some(format!("step {} ({}) failed", failed.id, failed.function));
                }
                tracing::warn!(job_id = ?self.job_id, step = %failed.function, "pipeline step failed");
            }
        }
        false
    }
}

/// Handle the background tasks hold on to.
pub(crate) struct Shared<A> {
    pub api: Arc<A>,
    pub config: ClientConfig,
    state: Mutex<RunState>,
    view: watch::Sender<OrchestratorView>,
}

/// Report URL the caller should start downloading, if any.
pub(crate) type DownloadRequest = Option<String>;

impl<A: OrchestratorApi> Shared<A> {
    pub fn new(api: Arc<A>, config: ClientConfig) -> Self {
        let state = RunState::new();
        let (view, _) = watch::channel(state.view());
        Self {
            api,
            config,
            state: Mutex::new(state),
            view,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorView> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> OrchestratorView {
        self.state.lock().view()
    }

    /// Runs `f` on the state and publishes the result.
    pub fn update<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut state = self.state.lock();
        let out = f(&mut state);
        self.view.send_replace(state.view());
        out
    }

    /// Same as [`Shared::update`] but only while `generation` is current.
    pub fn update_run<R>(&self, generation: u64, f: impl FnOnce(&mut RunState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let out = f(&mut state);
        self.view.send_replace(state.view());
        Some(out)
    }

    pub fn is_active(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.generation == generation && !state.is_complete && !state.token.is_cancelled()
    }

    pub fn next_revision(&self) -> u64 {
        self.state.lock().next_revision()
    }

    pub fn apply_stream_message(&self, generation: u64, message: StreamMessage) -> DownloadRequest {
        self.update_run(generation, |state| {
            let revision = state.next_revision();
            let mut carried_url = false;
            match message {
                StreamMessage::Step {
                    function,
                    status,
                    report_url,
                } => {
                    tracing::debug!(%function, %status, revision, "stream update");
                    state.board.apply(&function, &status, revision, Channel::Stream);
                    carried_url = state.record_report_url(report_url);
                }
                StreamMessage::Failure { failed_at, error } => {
                    tracing::warn!(failed_at = ?failed_at, error = ?error, "backend reported a failure");
                    if let Some(function) = failed_at.as_deref() {
                        state.board.mark_error(function, revision);
                    }
                    state.is_processing = false;
                    state.last_error = Some(error.unwrap_or_else(|| "pipeline failed".to_string()));
                }
                StreamMessage::Report { url } => carried_url = state.record_report_url(Some(url)),
                StreamMessage::Other => {}
            }
            let completed = state.settle();
            take_download(state, self.config.auto_download && (carried_url || completed))
        })
        .flatten()
    }

    /// Applies a poll answer stamped with the revision taken when the
    /// request went out.
    pub fn apply_snapshot(&self, generation: u64, snapshot: StatusSnapshot, revision: u64) -> DownloadRequest {
        self.update_run(generation, |state| {
            for (function, status) in &snapshot.steps {
                state.board.apply(function, status, revision, Channel::Poll);
            }
            let carried_url = state.record_report_url(snapshot.report_url);
            let completed = state.settle();
            take_download(state, self.config.auto_download && (carried_url || completed))
        })
        .flatten()
    }
}

/// A download starts when the run completes or a completed run receives a
/// report URL, unless one is already running or done. A failed download
/// clears `download_started`, so the next URL-carrying update retries.
fn take_download(state: &mut RunState, triggered: bool) -> DownloadRequest {
    if !triggered || !state.is_complete || state.download_started || state.report_path.is_some() {
        return None;
    }
    let url = state.report_url.clone()?;
    state.download_started = true;
    Some(url)
}
