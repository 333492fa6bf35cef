use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{OrchestratorError, Result};
use crate::transport::normalize_base_url;
use crate::wire::PipelineFlags;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    /// How long a run waits for the event stream to open before moving on.
    pub stream_open_grace: Duration,
    pub poll_interval: Duration,
    pub probe_interval: Duration,
    pub probe_attempts: u32,
    /// Timeout for non-streaming requests.
    pub request_timeout: Duration,
    pub download_dir: PathBuf,
    pub auto_download: bool,
    pub flags: PipelineFlags,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8000/").expect("static URL"),
            stream_open_grace: Duration::from_millis(1200),
            poll_interval: Duration::from_millis(1000),
            probe_interval: Duration::from_millis(500),
            probe_attempts: 20,
            request_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("reports"),
            auto_download: true,
            flags: PipelineFlags::default(),
        }
    }
}

impl ClientConfig {
    /// Builds a config from `CURRICALIGN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("CURRICALIGN_API_URL") {
            config.api_base_url = normalize_base_url(&url)?;
        }
        if let Some(ms) = env_u64("CURRICALIGN_STREAM_GRACE_MS")? {
            config.stream_open_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CURRICALIGN_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CURRICALIGN_PROBE_INTERVAL_MS")? {
            config.probe_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_u64("CURRICALIGN_PROBE_ATTEMPTS")? {
            config.probe_attempts = attempts.max(1) as u32;
        }
        if let Some(secs) = env_u64("CURRICALIGN_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(dir) = env::var("CURRICALIGN_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn with_api_url(mut self, raw: &str) -> Result<Self> {
        self.api_base_url = normalize_base_url(raw)?;
        Ok(self)
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| OrchestratorError::InvalidInput(format!("{}={}: {}", key, value, e))),
        Err(_) => Ok(None),
    }
}
