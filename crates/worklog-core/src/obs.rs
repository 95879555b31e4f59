//! Structured observability hooks for extraction and delivery.
//!
//! This module provides:
//! - Source-scoped tracing spans via the `ExtractionSpan` RAII guard
//! - Emission functions for lifecycle events: extraction start/finish, block
//!   decoding failures, sink delivery and retries
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use crate::result::ExtractionResult;
use tracing::info;

/// RAII guard that enters a source-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = ExtractionSpan::enter("/home/runner/_diag/Worker_20240502.log");
/// // tracing calls below carry source = ".../Worker_20240502.log"
/// ```
pub struct ExtractionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExtractionSpan {
    /// Create and enter a span tagged with the log source.
    pub fn enter(source: &str) -> Self {
        let span = tracing::info_span!("worklog.extract", source = %source);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: extraction of a source started.
pub fn emit_extraction_started(source: &str) {
    info!(event = "extraction.started", source = %source);
}

/// Emit event: extraction finished with a summary of what was found.
pub fn emit_extraction_finished(result: &ExtractionResult) {
    info!(
        event = "extraction.finished",
        job_id = result.job_id.as_deref().unwrap_or("-"),
        lines = result.diagnostics.lines,
        spans = result.spans.len(),
        checkouts = result.checkouts.len(),
        unterminated = result.diagnostics.tracker.unterminated_spans,
        unparsed_lines = result.diagnostics.unparsed_lines,
    );
}

/// Emit event: a multi-line payload could not be decoded (warning level).
pub fn emit_block_malformed(kind: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "block.malformed", kind = %kind, error = %error);
}

/// Emit event: a batch was delivered to a sink.
pub fn emit_batch_sent(sink: &str, records: usize, attempts: u32) {
    info!(event = "sink.sent", sink = %sink, records = records, attempts = attempts);
}

/// Emit event: delivery failed and will be retried (warning level).
pub fn emit_send_retry(sink: &str, attempt: u32, backoff_ms: u64, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "sink.retry",
        sink = %sink,
        attempt = attempt,
        backoff_ms = backoff_ms,
        error = %error,
    );
}
