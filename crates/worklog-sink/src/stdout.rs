//! Newline-delimited JSON sink.

use crate::error::SinkResult;
use crate::TelemetrySink;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;
use worklog_core::obs;
use worklog_core::TelemetryBatch;

/// Writes each record of a batch as one JSON line.
pub struct StdoutSink<W: Write + Send = std::io::Stdout> {
    writer: Mutex<W>,
}

impl StdoutSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> StdoutSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer, e.g. to inspect a buffer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> TelemetrySink for StdoutSink<W> {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, batch: &TelemetryBatch) -> SinkResult<()> {
        let mut lines = Vec::new();
        for record in batch.records() {
            serde_json::to_writer(&mut lines, &record)?;
            lines.push(b'\n');
        }

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&lines)?;
        writer.flush()?;

        obs::emit_batch_sent(self.name(), batch.record_count(), 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worklog_core::{build_batch, ExtractionResult};

    #[tokio::test]
    async fn test_writes_one_line_per_record() {
        let sink = StdoutSink::new(Vec::new());
        let batch = build_batch(&ExtractionResult::default());
        sink.send(&batch).await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 1);
        assert!(out.ends_with('\n'));
        assert!(out.contains("\"type\":\"job_summary\""));
    }
}
