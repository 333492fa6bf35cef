//! Request and response bodies of the orchestrator HTTP/SSE contract.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::steps::FINAL_STEP_FN;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// Where the curriculum data for a run comes from. Anything other than
/// `stored` means freshly uploaded data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum RunSource {
    #[default]
    Pdf,
    Stored,
}

impl From<String> for RunSource {
    fn from(source: String) -> Self {
        if source.trim().eq_ignore_ascii_case("stored") {
            RunSource::Stored
        } else {
            RunSource::Pdf
        }
    }
}

impl std::fmt::Display for RunSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunSource::Pdf => f.write_str("pdf"),
            RunSource::Stored => f.write_str("stored"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineFlags {
    pub scrape_enabled: bool,
    pub extract_enabled: bool,
    pub retrain_models: bool,
    pub generate_pdf: bool,
}

impl Default for PipelineFlags {
    fn default() -> Self {
        Self {
            scrape_enabled: true,
            extract_enabled: true,
            retrain_models: false,
            generate_pdf: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPipelineRequest {
    #[serde(default)]
    pub source: RunSource,
    #[serde(flatten)]
    pub flags: PipelineFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPipelineResponse {
    pub status: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub status: String,
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// Polling answer: latest status word per backend function key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub steps: BTreeMap<String, String>,
    #[serde(rename = "reportUrl", default)]
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResponse {
    #[serde(default)]
    pub inserted: Vec<Value>,
    #[serde(default)]
    pub parsed_rows: Vec<Value>,
    #[serde(default)]
    pub raw_text_len: usize,
}

/// JSON payload carried by one SSE `data:` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "jobId", default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Informational only. Unusual formats never cost the frame.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(rename = "reportUrl", default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(stamp) => Some(stamp),
        Value::Number(stamp) => Some(stamp.to_string()),
        _ => None,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl WireEvent {
    pub fn step(function: &str, status: &str) -> Self {
        Self {
            function: Some(function.to_string()),
            status: Some(status.to_string()),
            timestamp: Some(now()),
            ..Default::default()
        }
    }

    pub fn with_report_url(mut self, url: Option<String>) -> Self {
        self.report_url = url;
        self
    }

    pub fn failure(job_id: &str, failed_at: Option<&str>, error: &str) -> Self {
        Self {
            kind: Some("error".to_string()),
            job_id: Some(job_id.to_string()),
            timestamp: Some(now()),
            failed_at: failed_at.map(str::to_string),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Whether the backend closes the stream after sending this event.
    pub fn is_terminal(&self) -> bool {
        if self.kind.as_deref() == Some("error") {
            return true;
        }
        self.function.as_deref() == Some(FINAL_STEP_FN)
            && matches!(self.status.as_deref(), Some("completed") | Some("error"))
    }

    pub fn into_message(self) -> StreamMessage {
        if self.kind.as_deref() == Some("error") {
            return StreamMessage::Failure {
                failed_at: self.failed_at,
                error: self.error,
            };
        }
        match (self.function, self.status, self.report_url) {
            (Some(function), Some(status), report_url) => StreamMessage::Step {
                function,
                status,
                report_url,
            },
            (_, _, Some(url)) => StreamMessage::Report { url },
            _ => StreamMessage::Other,
        }
    }
}

/// A decoded stream message as the client acts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Step {
        function: String,
        status: String,
        report_url: Option<String>,
    },
    Failure {
        failed_at: Option<String>,
        error: Option<String>,
    },
    Report {
        url: String,
    },
    Other,
}

impl StreamMessage {
    pub fn parse(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<WireEvent>(data).map(WireEvent::into_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_flattens_flags() {
        let body = StartPipelineRequest {
            source: RunSource::Stored,
            flags: PipelineFlags::default(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["source"], "stored");
        assert_eq!(json["scrapeEnabled"], true);
        assert_eq!(json["retrainModels"], false);
        assert_eq!(json["generatePdf"], true);
    }

    #[test]
    fn parses_the_three_message_shapes() {
        let step = StreamMessage::parse(
            r#"{"function":"generate_pdf_report","status":"completed","timestamp":"2025-01-01T00:00:00+00:00","reportUrl":"/api/reports/r.pdf"}"#,
        )
        .unwrap();
        assert_eq!(
            step,
            StreamMessage::Step {
                function: "generate_pdf_report".into(),
                status: "completed".into(),
                report_url: Some("/api/reports/r.pdf".into()),
            }
        );

        let failure =
            StreamMessage::parse(r#"{"type":"error","failed_at":"train_query_model","error":"boom"}"#).unwrap();
        assert_eq!(
            failure,
            StreamMessage::Failure {
                failed_at: Some("train_query_model".into()),
                error: Some("boom".into()),
            }
        );

        let report = StreamMessage::parse(r#"{"reportUrl":"/api/reports/x.pdf"}"#).unwrap();
        assert_eq!(report, StreamMessage::Report { url: "/api/reports/x.pdf".into() });
    }

    #[test]
    fn naive_or_odd_timestamps_do_not_drop_the_update() {
        for stamp in [r#""2025-01-01T00:00:00.123456""#, "1735689600", r#""yesterday""#, "null"] {
            let data = format!(
                r#"{{"function":"scrape_jobs_from_google_jobs","status":"started","timestamp":{}}}"#,
                stamp
            );
            assert_eq!(
                StreamMessage::parse(&data).unwrap(),
                StreamMessage::Step {
                    function: "scrape_jobs_from_google_jobs".into(),
                    status: "started".into(),
                    report_url: None,
                },
                "timestamp {}",
                stamp
            );
        }
    }

    #[test]
    fn start_request_defaults_missing_fields() {
        let empty: StartPipelineRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.source, RunSource::Pdf);
        assert_eq!(empty.flags, PipelineFlags::default());

        let partial: StartPipelineRequest =
            serde_json::from_str(r#"{"source":"stored","retrainModels":true}"#).unwrap();
        assert_eq!(partial.source, RunSource::Stored);
        assert!(partial.flags.retrain_models);
        assert!(partial.flags.scrape_enabled);
        assert!(partial.flags.generate_pdf);

        let fresh: StartPipelineRequest = serde_json::from_str(r#"{"source":"fresh"}"#).unwrap();
        assert_eq!(fresh.source, RunSource::Pdf);
    }

    #[test]
    fn snapshot_tolerates_null_report_url() {
        let snap: StatusSnapshot =
            serde_json::from_str(r#"{"steps":{"scrape_jobs_from_google_jobs":"started"},"reportUrl":null}"#).unwrap();
        assert_eq!(snap.steps.len(), 1);
        assert!(snap.report_url.is_none());
    }

    #[test]
    fn terminal_events() {
        assert!(WireEvent::step(FINAL_STEP_FN, "completed").is_terminal());
        assert!(WireEvent::step(FINAL_STEP_FN, "error").is_terminal());
        assert!(!WireEvent::step(FINAL_STEP_FN, "started").is_terminal());
        assert!(WireEvent::failure("j", None, "x").is_terminal());
    }
}
