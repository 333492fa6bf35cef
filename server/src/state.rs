// server/src/state.rs
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use orchestrator_client::wire::{StatusSnapshot, WireEvent};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Knobs for the simulated backend.
#[derive(Clone, Debug)]
pub struct MockOptions {
    /// Time each stage "runs" before it reports completion.
    pub step_delay: Duration,
    /// When false the events endpoint answers 503 so clients fall back to polling.
    pub sse_enabled: bool,
    /// Backend function key that fails instead of completing.
    pub fail_at: Option<String>,
    pub reports_dir: PathBuf,
    /// How long a finished job stays queryable on the status endpoint.
    pub finished_job_ttl: Duration,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(300),
            sse_enabled: true,
            fail_at: None,
            reports_dir: PathBuf::from("static/reports"),
            finished_job_ttl: Duration::from_secs(600),
        }
    }
}

/// Latest known state of one job.
#[derive(Clone, Debug, Default)]
pub struct JobRecord {
    pub steps: BTreeMap<String, String>,
    pub report_url: Option<String>,
    pub finished_at: Option<Instant>,
}

impl JobRecord {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            steps: self.steps.clone(),
            report_url: self.report_url.clone(),
        }
    }
}

/// What an events request gets: live updates, or the final table of a job
/// that already finished.
pub enum Subscription {
    Live(broadcast::Receiver<WireEvent>),
    Finished(StatusSnapshot),
}

// Uygulama durumu: job_id → yayın kanalı + son durum
#[derive(Clone, Debug)]
pub struct AppState {
    pub jobs: Arc<DashMap<String, JobRecord>>,
    pub channels: Arc<DashMap<String, broadcast::Sender<WireEvent>>>,
    pub cancelled: Arc<DashSet<String>>,
    pub options: Arc<MockOptions>,
}

impl AppState {
    pub fn new(options: MockOptions) -> Self {
        AppState {
            jobs: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            cancelled: Arc::new(DashSet::new()),
            options: Arc::new(options),
        }
    }

    /// Records a freshly minted job id.
    pub fn register(&self, job_id: &str) {
        self.jobs.entry(job_id.to_string()).or_default();
    }

    /// Registers a stream subscriber. Only events published afterwards are
    /// seen live; a finished job answers with its status table instead.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        // The record guard orders this against `finish`.
        let record = self.jobs.entry(job_id.to_string()).or_default();
        if record.finished_at.is_some() {
            return Subscription::Finished(record.snapshot());
        }
        let rx = self
            .channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription::Live(rx)
    }

    /// Records the event in the job's status table and broadcasts it.
    pub fn publish(&self, job_id: &str, event: WireEvent) {
        {
            let mut record = self.jobs.entry(job_id.to_string()).or_default();
            if let (Some(function), Some(status)) = (&event.function, &event.status) {
                record.steps.insert(function.clone(), status.clone());
            }
            if let Some(url) = &event.report_url {
                record.report_url = Some(url.clone());
            }
        }

        tracing::debug!(
            job_id,
            function = ?event.function,
            status = ?event.status,
            kind = ?event.kind,
            "publishing event"
        );

        if let Some(sender) = self.channels.get(job_id) {
            // No live subscribers is fine; pollers still see the status table.
            let _ = sender.send(event);
        }
    }

    pub fn status(&self, job_id: &str) -> StatusSnapshot {
        self.jobs
            .get(job_id)
            .map(|record| record.snapshot())
            .unwrap_or_default()
    }

    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancelled.contains(job_id)
    }

    /// Marks a known, unfinished job as cancelled. Returns false otherwise.
    pub fn mark_cancelled(&self, job_id: &str) -> bool {
        match self.jobs.get(job_id) {
            Some(record) if record.finished_at.is_none() => {
                self.cancelled.insert(job_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Marks the job finished, drops its broadcast channel and forgets jobs
    /// that finished longer than `finished_job_ttl` ago.
    pub fn finish(&self, job_id: &str) {
        {
            let mut record = self.jobs.entry(job_id.to_string()).or_default();
            record.finished_at = Some(Instant::now());
            self.channels.remove(job_id);
            self.cancelled.remove(job_id);
        }

        let ttl = self.options.finished_job_ttl;
        self.jobs.retain(|id, record| {
            let keep = record.finished_at.map_or(true, |at| at.elapsed() < ttl);
            if !keep {
                tracing::debug!(job_id = %id, "forgetting finished job");
            }
            keep
        });
    }
}
