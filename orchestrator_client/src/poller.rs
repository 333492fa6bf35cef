//! Polling fallback. Runs next to the event stream for the whole run and
//! retries failed polls at the same fixed cadence until the run completes
//! or is cancelled.

use tokio::time::{self, MissedTickBehavior};

use crate::api::OrchestratorApi;
use crate::orchestrator::{spawn_download, RunContext};

pub(crate) fn spawn<A: OrchestratorApi>(run: RunContext<A>) {
    tokio::spawn(async move {
        let mut ticker = time::interval(run.shared.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u64 = 0;

        loop {
            tokio::select! {
                _ = run.token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !run.shared.is_active(run.generation) {
                break;
            }

            let revision = run.shared.next_revision();
            let polled = tokio::select! {
                _ = run.token.cancelled() => break,
                polled = run.shared.api.poll_status(&run.job_id) => polled,
            };

            match polled {
                Ok(snapshot) => {
                    failures = 0;
                    if let Some(url) = run.shared.apply_snapshot(run.generation, snapshot, revision) {
                        spawn_download(run.shared.clone(), run.generation, url);
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id = %run.job_id, failures, error = %e, "status poll failed");
                }
            }
        }

        tracing::debug!(job_id = %run.job_id, "polling stopped");
    });
}
