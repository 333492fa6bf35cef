//! Console logging setup shared by the CLI and the mock server.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initializes the global subscriber once. `RUST_LOG` wins over
/// `CURRICALIGN_LOG`; the fallback level is `info`.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("CURRICALIGN_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(filter.clone())),
        );

        // Another subscriber may already be installed (tests, embedding apps).
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }

        tracing::debug!(filter = %filter, "logging initialized");
    });
}
