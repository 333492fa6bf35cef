//! Pipeline stage model and the per-step reconciliation rules.
//!
//! The board only ever changes in response to messages from the backend.
//! Each update carries a client-side revision; a step ignores updates whose
//! revision is not newer than the last one it applied, so the stream and the
//! polling fallback can race without a stale answer winning.

use serde::{Deserialize, Serialize};

/// Backend key of the stage whose completion ends the run.
pub const FINAL_STEP_FN: &str = "generate_pdf_report";

/// `(id, display name, backend function key)` for every tracked stage, in order.
pub const PIPELINE: [(&str, &str, &str); 7] = [
    ("1", "Scrape job listings", "scrape_jobs_from_google_jobs"),
    ("2", "Extract job skills", "extract_skills_from_jobs"),
    ("3", "Extract subject skills", "extract_subject_skills_from_supabase"),
    ("4", "Retrain subject score model", "train_subject_score_model"),
    ("5", "Retrain query model", "train_query_model"),
    ("6", "Compute subject scores", "compute_subject_scores_and_save"),
    ("7", "Generate PDF report", FINAL_STEP_FN),
];

/// Backend keys that stand for several tracked stages at once.
const ALIASES: [(&str, &[&str]); 1] = [(
    "retrain_ml_models",
    &["train_subject_score_model", "train_query_model"],
)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl StepStatus {
    /// Maps a backend status word through the fixed status table.
    pub fn from_backend(status: &str) -> Option<Self> {
        match status {
            "started" => Some(StepStatus::InProgress),
            "completed" => Some(StepStatus::Completed),
            "error" => Some(StepStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in-progress",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: String,
    pub name: String,
    #[serde(rename = "fn")]
    pub function: String,
    pub status: StepStatus,
}

/// Fresh all-pending step list.
pub fn initial_steps() -> Vec<ProcessStep> {
    PIPELINE
        .iter()
        .map(|(id, name, function)| ProcessStep {
            id: id.to_string(),
            name: name.to_string(),
            function: function.to_string(),
            status: StepStatus::Pending,
        })
        .collect()
}

/// Indexes of the tracked steps a backend function key refers to.
pub fn step_indexes(function: &str) -> Vec<usize> {
    if let Some((_, targets)) = ALIASES.iter().find(|(alias, _)| *alias == function) {
        return targets
            .iter()
            .filter_map(|target| PIPELINE.iter().position(|(_, _, f)| f == target))
            .collect();
    }
    PIPELINE
        .iter()
        .position(|(_, _, f)| *f == function)
        .into_iter()
        .collect()
}

/// Which channel an update came from. Decides the fallback for unknown statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stream,
    Poll,
}

/// Step list plus the last revision applied to each entry.
#[derive(Debug, Clone)]
pub struct StepBoard {
    steps: Vec<ProcessStep>,
    applied: Vec<u64>,
}

impl Default for StepBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StepBoard {
    pub fn new() -> Self {
        let steps = initial_steps();
        let applied = vec![0; steps.len()];
        Self { steps, applied }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn steps(&self) -> &[ProcessStep] {
        &self.steps
    }

    pub fn status_of(&self, function: &str) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|s| s.function == function)
            .map(|s| s.status)
    }

    /// Applies one backend `(function, status)` pair. Returns `true` if any
    /// step changed.
    pub fn apply(&mut self, function: &str, status: &str, revision: u64, channel: Channel) -> bool {
        let mut changed = false;
        for idx in step_indexes(function) {
            if revision <= self.applied[idx] {
                tracing::trace!(
                    function,
                    revision,
                    last = self.applied[idx],
                    "skipping stale step update"
                );
                continue;
            }
            let previous = self.steps[idx].status;
            let next = match (StepStatus::from_backend(status), channel) {
                (Some(mapped), _) => mapped,
                (None, Channel::Poll) => previous,
                (None, Channel::Stream) => StepStatus::Pending,
            };
            self.applied[idx] = revision;
            if next != previous {
                self.steps[idx].status = next;
                changed = true;
            }
        }
        changed
    }

    /// Marks exactly the steps named by `function` as failed.
    pub fn mark_error(&mut self, function: &str, revision: u64) -> bool {
        self.apply(function, "error", revision, Channel::Stream)
    }

    pub fn is_finished(&self) -> bool {
        self.status_of(FINAL_STEP_FN) == Some(StepStatus::Completed)
    }
}
