//! HTTP collector sink.
//!
//! POSTs the whole batch as one JSON document. Transport errors, 429 and 5xx
//! responses are retried with exponential backoff up to
//! [`SinkConfig::max_attempts`]; any other non-success status is final.

use crate::config::SinkConfig;
use crate::error::{SinkError, SinkResult};
use crate::TelemetrySink;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;
use worklog_core::obs;
use worklog_core::TelemetryBatch;

pub const KEY_HEADER: &str = "X-Telemetry-Key";
pub const BATCH_HEADER: &str = "X-Telemetry-Batch";

/// Sink posting batches to a collector endpoint
pub struct HttpSink {
    config: SinkConfig,
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpSink {
    /// Create a new HTTP sink. Fails if no endpoint is configured.
    pub fn new(config: SinkConfig) -> SinkResult<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| SinkError::Config("telemetry endpoint is not set".to_string()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("worklog/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()?;

        Ok(HttpSink {
            config,
            endpoint,
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_once(&self, body: &[u8], batch_id: &str) -> SinkResult<()> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(BATCH_HEADER, batch_id)
            .body(body.to_vec());
        if let Some(key) = &self.config.key {
            request = request.header(KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, batch: &TelemetryBatch) -> SinkResult<()> {
        let body = serde_json::to_vec(batch)?;
        let batch_id = Uuid::new_v4().to_string();
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            debug!(endpoint = %self.endpoint, batch_id = %batch_id, attempt, "Posting telemetry batch");
            match self.post_once(&body, &batch_id).await {
                Ok(()) => {
                    obs::emit_batch_sent(self.name(), batch.record_count(), attempt);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.backoff_for(attempt);
                    obs::emit_send_retry(self.name(), attempt, backoff.as_millis() as u64, &e);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
