//! Event stream channel of a run.

use futures::StreamExt;
use tokio::sync::oneshot;

use crate::api::OrchestratorApi;
use crate::orchestrator::{spawn_download, RunContext};

/// Opens the job's event stream in the background.
///
/// The returned receiver fires once the stream is open. It is dropped
/// without firing when opening fails, which the caller treats the same as
/// an elapsed grace period.
pub(crate) fn spawn<A: OrchestratorApi>(run: RunContext<A>) -> oneshot::Receiver<()> {
    let (open_tx, open_rx) = oneshot::channel();

    tokio::spawn(async move {
        let opened = tokio::select! {
            _ = run.token.cancelled() => return,
            opened = run.shared.api.open_events(&run.job_id) => opened,
        };

        let mut messages = match opened {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(job_id = %run.job_id, error = %e, "event stream unavailable, relying on polling");
                return;
            }
        };
        tracing::debug!(job_id = %run.job_id, "event stream open");
        let _ = open_tx.send(());

        loop {
            let next = tokio::select! {
                _ = run.token.cancelled() => break,
                next = messages.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    if let Some(url) = run.shared.apply_stream_message(run.generation, message) {
                        spawn_download(run.shared.clone(), run.generation, url);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %run.job_id, error = %e, "event stream error, polling continues");
                }
                None => {
                    tracing::debug!(job_id = %run.job_id, "event stream closed");
                    break;
                }
            }
        }
    });

    open_rx
}
