//! worklog sink - delivery of extraction records
//!
//! A [`TelemetrySink`] receives one [`TelemetryBatch`] per job. Sinks:
//! - [`StdoutSink`]: newline-delimited JSON records to any writer
//! - [`HttpSink`]: POST to a collector endpoint with bounded retry
//! - [`fakes::MemorySink`]: keeps batches in memory for tests

pub mod config;
pub mod error;
pub mod fakes;
pub mod http;
pub mod stdout;

pub use config::SinkConfig;
pub use error::{SinkError, SinkResult};
pub use http::HttpSink;
pub use stdout::StdoutSink;

use async_trait::async_trait;
use worklog_core::TelemetryBatch;

/// Destination for extracted telemetry.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver one batch. Retrying is the sink's own concern.
    async fn send(&self, batch: &TelemetryBatch) -> SinkResult<()>;
}
