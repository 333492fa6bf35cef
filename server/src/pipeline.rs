// server/src/pipeline.rs
//! Simulated stage runner. Emits the same event sequence as the real
//! backend but only sleeps where the real one scrapes, extracts and trains.

use std::path::Path;

use orchestrator_client::steps::FINAL_STEP_FN;
use orchestrator_client::wire::{StartPipelineRequest, WireEvent};

use crate::state::AppState;

/// Backend phases in execution order. Phases with two keys start and finish together.
pub const PHASES: [&[&str]; 5] = [
    &["scrape_jobs_from_google_jobs"],
    &["extract_skills_from_jobs", "extract_subject_skills_from_supabase"],
    &["retrain_ml_models"],
    &["compute_subject_scores_and_save"],
    &[FINAL_STEP_FN],
];

pub async fn run_job(state: AppState, job_id: String, request: StartPipelineRequest) {
    tracing::info!(%job_id, source = %request.source, flags = ?request.flags, "background job started");

    for phase in PHASES {
        if state.is_cancelled(&job_id) {
            tracing::info!(%job_id, phase = phase[0], "job cancelled");
            for function in phase {
                state.publish(&job_id, WireEvent::step(function, "cancelled"));
            }
            break;
        }

        for function in phase {
            state.publish(&job_id, WireEvent::step(function, "started"));
        }
        tokio::time::sleep(state.options.step_delay).await;

        if let Some(failed) = phase
            .iter()
            .find(|f| state.options.fail_at.as_deref() == Some(**f))
        {
            tracing::error!(%job_id, function = %failed, "simulated stage failure");
            state.publish(&job_id, WireEvent::step(failed, "error"));
            state.publish(
                &job_id,
                WireEvent::failure(&job_id, Some(*failed), &format!("{} failed", failed)),
            );
            break;
        }

        let report_url = if phase.contains(&FINAL_STEP_FN) && request.flags.generate_pdf {
            match write_placeholder_report(&state.options.reports_dir, &job_id).await {
                Ok(file_name) => Some(format!("/api/reports/{}", file_name)),
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "could not write report");
                    state.publish(&job_id, WireEvent::step(FINAL_STEP_FN, "error"));
                    state.publish(&job_id, WireEvent::failure(&job_id, Some(FINAL_STEP_FN), &e.to_string()));
                    break;
                }
            }
        } else {
            None
        };

        for function in phase {
            state.publish(
                &job_id,
                WireEvent::step(function, "completed").with_report_url(report_url.clone()),
            );
        }
    }

    state.finish(&job_id);
    tracing::info!(%job_id, "background job finished");
}

async fn write_placeholder_report(dir: &Path, job_id: &str) -> std::io::Result<String> {
    tokio::fs::create_dir_all(dir).await?;
    let short_id: String = job_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
    let file_name = format!(
        "curricalign_report_{}_{}.pdf",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        short_id
    );
    let body = format!(
        "%PDF-1.4\n% CurricAlign placeholder report for job {}\n%%EOF\n",
        job_id
    );
    tokio::fs::write(dir.join(&file_name), body).await?;
    Ok(file_name)
}
