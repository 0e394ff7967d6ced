use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use sluice_event::Event;
use snafu::ResultExt as _;
use tracing::debug;

use super::{MetricsSender, Rejected, SendError, Transport};
use crate::config::HttpBackendConfig;
use crate::GenericError;

/// Header carrying the backend API token.
const API_TOKEN_HEADER: &str = "m-api-token";

/// Forwards batches to an HTTP ingestion endpoint.
///
/// Events are serialized in their canonical line form, one per line, and delivered in a single `PUT` per batch.
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSender {
    /// Creates a sender from the given backend configuration.
    pub fn from_config(config: &HttpBackendConfig) -> Result<Self, GenericError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        })
    }

    fn render_body(batch: &[Event]) -> String {
        let mut body = String::new();
        for (i, event) in batch.iter().enumerate() {
            if i > 0 {
                body.push('\n');
            }

            // Writing into a `String` cannot fail.
            let _ = write!(body, "{}", event);
        }
        body
    }
}

#[async_trait]
impl MetricsSender for HttpSender {
    async fn send(&self, batch: Vec<Event>) -> Result<(), SendError> {
        let events = batch.len();

        let mut request = self
            .client
            .put(&self.endpoint)
            .header("content-type", "text/plain")
            .body(Self::render_body(&batch));
        if let Some(token) = &self.token {
            request = request.header(API_TOKEN_HEADER, token);
        }

        let response = request.send().await.context(Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Rejected { status }.fail();
        }

        debug!(events, status = %status, "Forwarded batch.");
        Ok(())
    }
}
