//! The backend seam: every call the client makes against the orchestrator.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{OrchestratorError, Result};
use crate::sse::SseDecoder;
use crate::transport;
use crate::wire::{
    CancelRequest, InitResponse, ScanResponse, StartPipelineRequest, StatusSnapshot, StreamMessage,
};

pub const SCAN_PDF_PATH: &str = "/api/scan-pdf";
pub const INIT_PATH: &str = "/api/orchestrator/init";
pub const START_PIPELINE_PATH: &str = "/api/orchestrator/start-pipeline";
pub const EVENTS_PATH: &str = "/api/orchestrator/events";
pub const STATUS_PATH: &str = "/api/orchestrator/status";
pub const CANCEL_PATH: &str = "/api/orchestrator/cancel";

/// Messages of one job's event stream, in arrival order.
pub type MessageStream = BoxStream<'static, Result<StreamMessage>>;

#[async_trait]
pub trait OrchestratorApi: Send + Sync + 'static {
    /// Uploads a curriculum PDF for scanning.
    async fn scan_pdf(&self, file_name: &str, bytes: Vec<u8>) -> Result<ScanResponse>;

    /// Mints a job id.
    async fn init_job(&self) -> Result<String>;

    /// Resolves once the stream for `job_id` is open.
    async fn open_events(&self, job_id: &str) -> Result<MessageStream>;

    async fn start_pipeline(&self, job_id: &str, request: &StartPipelineRequest) -> Result<()>;

    async fn poll_status(&self, job_id: &str) -> Result<StatusSnapshot>;

    async fn cancel_job(&self, job_id: &str) -> Result<()>;

    /// Turns a backend report URL into an absolute one.
    fn resolve_report_url(&self, report_url: &str) -> Result<Url>;

    async fn probe_report(&self, url: &Url) -> bool;

    async fn fetch_report(&self, url: &Url) -> Result<Bytes>;
}

/// reqwest implementation of [`OrchestratorApi`].
pub struct HttpOrchestratorApi {
    client: Client,
    stream_client: Client,
    base_url: Url,
}

impl HttpOrchestratorApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OrchestratorError::transport("client", e))?;
        // No overall timeout: the event stream stays open for the whole run.
        let stream_client = Client::builder()
            .build()
            .map_err(|e| OrchestratorError::transport("client", e))?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.api_base_url.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        transport::endpoint(&self.base_url, path)
    }
}

async fn check(endpoint: &str, res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(OrchestratorError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(endpoint: &str, res: Response) -> Result<T> {
    let res = check(endpoint, res).await?;
    res.json::<T>()
        .await
        .map_err(|e| OrchestratorError::decode(endpoint, e))
}

#[async_trait]
impl OrchestratorApi for HttpOrchestratorApi {
    async fn scan_pdf(&self, file_name: &str, bytes: Vec<u8>) -> Result<ScanResponse> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| OrchestratorError::transport(SCAN_PDF_PATH, e))?;
        let form = multipart::Form::new().part("pdf", part);

        let res = self
            .client
            .post(self.url(SCAN_PDF_PATH)?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(SCAN_PDF_PATH, e))?;
        decode(SCAN_PDF_PATH, res).await
    }

    async fn init_job(&self) -> Result<String> {
        let res = self
            .client
            .post(self.url(INIT_PATH)?)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(INIT_PATH, e))?;
        let body: InitResponse = decode(INIT_PATH, res).await?;
        Ok(body.job_id)
    }

    async fn open_events(&self, job_id: &str) -> Result<MessageStream> {
        let res = self
            .stream_client
            .get(self.url(EVENTS_PATH)?)
            .query(&[("jobId", job_id)])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(EVENTS_PATH, e))?;
        let res = check(EVENTS_PATH, res).await?;

        let messages = res
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let decoded: Vec<Result<StreamMessage>> = match chunk {
                    Ok(bytes) => decoder
                        .push(&bytes)
                        .into_iter()
                        .filter(|event| event.is_message())
                        .map(|event| {
                            StreamMessage::parse(&event.data)
                                .map_err(|e| OrchestratorError::decode(EVENTS_PATH, e))
                        })
                        .collect(),
                    Err(e) => vec![Err(OrchestratorError::transport(EVENTS_PATH, e))],
                };
                futures::future::ready(Some(stream::iter(decoded)))
            })
            .flatten()
            .boxed();

        Ok(messages)
    }

    async fn start_pipeline(&self, job_id: &str, request: &StartPipelineRequest) -> Result<()> {
        let url = transport::endpoint_with_segment(&self.base_url, START_PIPELINE_PATH, job_id)?;
        let res = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(START_PIPELINE_PATH, e))?;
        check(START_PIPELINE_PATH, res).await?;
        Ok(())
    }

    async fn poll_status(&self, job_id: &str) -> Result<StatusSnapshot> {
        let res = self
            .client
            .get(self.url(STATUS_PATH)?)
            .query(&[("jobId", job_id)])
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(STATUS_PATH, e))?;
        decode(STATUS_PATH, res).await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let res = self
            .client
            .post(self.url(CANCEL_PATH)?)
            .json(&CancelRequest {
                job_id: job_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(CANCEL_PATH, e))?;
        check(CANCEL_PATH, res).await?;
        Ok(())
    }

    fn resolve_report_url(&self, report_url: &str) -> Result<Url> {
        transport::resolve_report_url(&self.base_url, report_url)
    }

    async fn probe_report(&self, url: &Url) -> bool {
        transport::is_reachable(&self.client, url).await
    }

    async fn fetch_report(&self, url: &Url) -> Result<Bytes> {
        let endpoint = url.path().to_string();
        let res = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| OrchestratorError::transport(endpoint.clone(), e))?;
        let res = check(&endpoint, res).await?;
        res.bytes()
            .await
            .map_err(|e| OrchestratorError::transport(endpoint, e))
    }
}
