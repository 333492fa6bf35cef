//! In-memory backend used by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::api::{MessageStream, OrchestratorApi};
use crate::error::{OrchestratorError, Result};
use crate::transport;
use crate::wire::{ScanResponse, StartPipelineRequest, StatusSnapshot, StreamMessage};

pub fn step(function: &str, status: &str) -> StreamMessage {
    StreamMessage::Step {
        function: function.to_string(),
        status: status.to_string(),
        report_url: None,
    }
}

/// Calls the fake backend received.
#[derive(Default)]
pub struct Recorder {
    pub uploads: Mutex<Vec<String>>,
    pub starts: Mutex<Vec<(String, StartPipelineRequest)>>,
    pub cancels: Mutex<Vec<String>>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
}

impl Recorder {
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

pub struct FakeApi {
    job_id: String,
    recorder: Arc<Recorder>,
    events_tx: mpsc::UnboundedSender<StreamMessage>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamMessage>>>,
    poll: Mutex<StatusSnapshot>,
    stream_fails: AtomicBool,
    init_fails: AtomicBool,
    init_delay: Mutex<Duration>,
    scan_fails: AtomicBool,
    start_fails: AtomicBool,
    reachable: AtomicBool,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::with_job("job-1")
    }
}

impl FakeApi {
    pub fn with_job(job_id: &str) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            job_id: job_id.to_string(),
            recorder: Arc::new(Recorder::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            poll: Mutex::new(StatusSnapshot::default()),
            stream_fails: AtomicBool::new(false),
            init_fails: AtomicBool::new(false),
            init_delay: Mutex::new(Duration::ZERO),
            scan_fails: AtomicBool::new(false),
            start_fails: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn event_sender(&self) -> mpsc::UnboundedSender<StreamMessage> {
        self.events_tx.clone()
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }

    pub fn set_poll_status(&self, steps: &[(&str, &str)], report_url: Option<&str>) {
        let mut poll = self.poll.lock();
        poll.steps = steps
            .iter()
            .map(|(f, s)| (f.to_string(), s.to_string()))
            .collect();
        poll.report_url = report_url.map(str::to_string);
    }

    pub fn fail_stream(&self) {
        self.stream_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_init(&self) {
        self.init_fails.store(true, Ordering::SeqCst);
    }

    /// Holds `init_job` for `delay` before answering.
    pub fn delay_init(&self, delay: Duration) {
        *self.init_delay.lock() = delay;
    }

    pub fn fail_scan(&self) {
        self.scan_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_start(&self) {
        self.start_fails.store(true, Ordering::SeqCst);
    }

    pub fn never_reachable(&self) {
        self.reachable.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrchestratorApi for FakeApi {
    async fn scan_pdf(&self, file_name: &str, _bytes: Vec<u8>) -> Result<ScanResponse> {
        self.recorder.uploads.lock().push(file_name.to_string());
        if self.scan_fails.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                endpoint: "/api/scan-pdf".into(),
                status: 400,
                body: r#"{"detail":"Could not parse PDF."}"#.into(),
            });
        }
        Ok(ScanResponse::default())
    }

    async fn init_job(&self) -> Result<String> {
        let delay = *self.init_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.init_fails.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                endpoint: "/api/orchestrator/init".into(),
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(self.job_id.clone())
    }

    async fn open_events(&self, _job_id: &str) -> Result<MessageStream> {
        if self.stream_fails.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                endpoint: "/api/orchestrator/events".into(),
                status: 503,
                body: String::new(),
            });
        }
        let rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| OrchestratorError::InvalidInput("stream already taken".into()))?;
        let messages = stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|message| (Ok::<_, OrchestratorError>(message), rx))
        });
        Ok(messages.boxed())
    }

    async fn start_pipeline(&self, job_id: &str, request: &StartPipelineRequest) -> Result<()> {
        self.recorder
            .starts
            .lock()
            .push((job_id.to_string(), request.clone()));
        if self.start_fails.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                endpoint: "/api/orchestrator/start-pipeline".into(),
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(())
    }

    async fn poll_status(&self, _job_id: &str) -> Result<StatusSnapshot> {
        Ok(self.poll.lock().clone())
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.recorder.cancels.lock().push(job_id.to_string());
        Ok(())
    }

    fn resolve_report_url(&self, report_url: &str) -> Result<Url> {
        let base = transport::normalize_base_url("http://fake.test")?;
        transport::resolve_report_url(&base, report_url)
    }

    async fn probe_report(&self, _url: &Url) -> bool {
        self.recorder.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    async fn fetch_report(&self, _url: &Url) -> Result<Bytes> {
        self.recorder.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"%PDF-1.4 fake report"))
    }
}
