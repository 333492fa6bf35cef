use std::path::Path;
use std::time::Duration;

use mock_orchestrator::{AppState, MockOptions};
use orchestrator_client::transport::normalize_base_url;
use orchestrator_client::{
    ClientConfig, HttpOrchestratorApi, Orchestrator, OrchestratorApi, OrchestratorView, StepStatus,
};
use tokio::net::TcpListener;

struct Harness {
    base: String,
    _reports: tempfile::TempDir,
    downloads: tempfile::TempDir,
}

async fn start_mock(configure: impl FnOnce(&mut MockOptions)) -> Harness {
    let reports = tempfile::tempdir().unwrap();
    let mut options = MockOptions {
        step_delay: Duration::from_millis(40),
        reports_dir: reports.path().to_path_buf(),
        ..MockOptions::default()
    };
    configure(&mut options);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (addr, _) = mock_orchestrator::spawn(listener, AppState::new(options)).unwrap();

    Harness {
        base: format!("http://{}", addr),
        _reports: reports,
        downloads: tempfile::tempdir().unwrap(),
    }
}

fn client_config(harness: &Harness) -> ClientConfig {
    ClientConfig {
        api_base_url: normalize_base_url(&harness.base).unwrap(),
        stream_open_grace: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
        probe_interval: Duration::from_millis(20),
        probe_attempts: 10,
        download_dir: harness.downloads.path().to_path_buf(),
        ..ClientConfig::default()
    }
}

async fn settle(orchestrator: &Orchestrator) -> OrchestratorView {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_until_settled())
        .await
        .expect("run settled in time")
}

async fn download(orchestrator: &Orchestrator) -> OrchestratorView {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_download())
        .await
        .expect("download settled in time")
}

fn assert_all(view: &OrchestratorView, status: StepStatus) {
    for step in &view.steps {
        assert_eq!(step.status, status, "step {} ({})", step.id, step.function);
    }
}

fn assert_saved_pdf(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn stored_run_completes_over_the_event_stream_and_downloads_the_report() {
    let harness = start_mock(|_| {}).await;
    let orchestrator = Orchestrator::from_config(client_config(&harness)).unwrap();

    let job_id = orchestrator.start_from_stored().await.unwrap();
    assert!(!job_id.is_empty());

    let view = settle(&orchestrator).await;
    assert!(view.is_complete);
    assert!(view.last_error.is_none());
    assert_all(&view, StepStatus::Completed);
    assert!(view.report_url.as_deref().unwrap().starts_with("/api/reports/"));

    let view = download(&orchestrator).await;
    let path = view.report_path.expect("report downloaded");
    assert!(path.starts_with(harness.downloads.path()));
    assert_saved_pdf(&path);
}

#[tokio::test]
async fn polling_alone_completes_when_the_stream_is_unavailable() {
    let harness = start_mock(|options| options.sse_enabled = false).await;
    let orchestrator = Orchestrator::from_config(client_config(&harness)).unwrap();

    orchestrator.start_from_stored().await.unwrap();
    let view = settle(&orchestrator).await;
    assert!(view.is_complete);
    assert_all(&view, StepStatus::Completed);

    let view = download(&orchestrator).await;
    assert_saved_pdf(&view.report_path.expect("report downloaded"));
}

#[tokio::test]
async fn backend_failure_marks_only_the_failed_step() {
    let harness = start_mock(|options| options.fail_at = Some("extract_skills_from_jobs".into())).await;
    let orchestrator = Orchestrator::from_config(client_config(&harness)).unwrap();

    orchestrator.start_from_stored().await.unwrap();
    let view = settle(&orchestrator).await;

    assert!(!view.is_complete);
    assert_eq!(view.steps[0].status, StepStatus::Completed);
    assert_eq!(view.steps[1].status, StepStatus::Error);
    // Started alongside the failed stage and never finished.
    assert_eq!(view.steps[2].status, StepStatus::InProgress);
    for step in &view.steps[3..] {
        assert_eq!(step.status, StepStatus::Pending);
    }
    assert!(view.last_error.is_some());

    orchestrator.cancel();
}

#[tokio::test]
async fn cancel_resets_locally_and_stops_the_backend_job() {
    let harness = start_mock(|options| options.step_delay = Duration::from_millis(250)).await;
    let config = client_config(&harness);
    let orchestrator = Orchestrator::from_config(config.clone()).unwrap();

    let job_id = orchestrator.start_from_stored().await.unwrap();
    let mut updates = orchestrator.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|view| view.steps[0].status == StepStatus::InProgress),
    )
    .await
    .unwrap()
    .unwrap();

    orchestrator.cancel();
    let view = orchestrator.view();
    assert!(!view.is_processing);
    assert!(view.job_id.is_none());
    assert_all(&view, StepStatus::Pending);

    let api = HttpOrchestratorApi::new(&config).unwrap();
    let cancelled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = api.poll_status(&job_id).await.unwrap();
            if snapshot.steps.values().any(|status| status == "cancelled") {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("backend observed the cancel request");
    assert!(!cancelled.steps.contains_key("generate_pdf_report"));
}

#[tokio::test]
async fn pdf_run_uploads_the_file_first() {
    let harness = start_mock(|_| {}).await;
    let orchestrator = Orchestrator::from_config(client_config(&harness)).unwrap();

    let pdf = harness.downloads.path().join("curriculum.pdf");
    std::fs::write(&pdf, b"%PDF-1.4 curriculum").unwrap();

    orchestrator.start_from_pdf(&pdf).await.unwrap();
    let view = settle(&orchestrator).await;
    assert!(view.is_complete);
}

#[tokio::test]
async fn contract_rejects_bad_requests() {
    let harness = start_mock(|_| {}).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/orchestrator/status?jobId=", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Job ID is required.");

    let form = reqwest::multipart::Form::new().part(
        "pdf",
        reqwest::multipart::Part::bytes(b"plain text".to_vec()).file_name("notes.txt"),
    );
    let res = client
        .post(format!("{}/api/scan-pdf", harness.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let res = client
        .get(format!("{}/api/reports/missing.pdf", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client
        .post(format!("{}/api/orchestrator/init", harness.base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["jobId"].as_str().is_some());
}

#[tokio::test]
async fn start_pipeline_accepts_a_partial_body() {
    let harness = start_mock(|_| {}).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/orchestrator/start-pipeline/partial-job", harness.base))
        .json(&serde_json::json!({ "retrainModels": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "started");

    let res = client
        .post(format!("{}/api/orchestrator/start-pipeline/empty-job", harness.base))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn finished_job_stream_replays_final_status_and_closes() {
    let harness = start_mock(|_| {}).await;
    let orchestrator = Orchestrator::from_config(client_config(&harness)).unwrap();
    let job_id = orchestrator.start_from_stored().await.unwrap();
    assert!(settle(&orchestrator).await.is_complete);

    // The job's own channel is dropped once it finishes; wait for that.
    let client = reqwest::Client::new();
    let body = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let res = client
                .get(format!("{}/api/orchestrator/events", harness.base))
                .query(&[("jobId", job_id.as_str())])
                .timeout(Duration::from_millis(500))
                .send()
                .await;
            if let Ok(res) = res {
                if let Ok(body) = res.text().await {
                    if body.contains("generate_pdf_report") {
                        return body;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("late stream request completed");
    assert!(body.contains("\"reportUrl\":\"/api/reports/"));
    assert!(body.contains("event: ping"));

    let res = client
        .post(format!("{}/api/orchestrator/cancel", harness.base))
        .json(&serde_json::json!({ "jobId": job_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let api = HttpOrchestratorApi::new(&client_config(&harness)).unwrap();
    let snapshot = api.poll_status(&job_id).await.unwrap();
    assert!(snapshot.steps.values().all(|status| status == "completed"));
}

