//! In-memory sink (testing only)

use std::sync::Mutex;

use async_trait::async_trait;
use worklog_core::TelemetryBatch;

use crate::error::{SinkError, SinkResult};
use crate::TelemetrySink;

/// Sink that keeps every batch it receives.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<TelemetryBatch>>,
    fail_with: Mutex<Option<u16>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail with the given status.
    pub fn fail_with_status(&self, status: u16) {
        *self.fail_with.lock().unwrap() = Some(status);
    }

    pub fn batches(&self) -> Vec<TelemetryBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, batch: &TelemetryBatch) -> SinkResult<()> {
        if let Some(status) = *self.fail_with.lock().unwrap() {
            return Err(SinkError::Status {
                status,
                body: "injected failure".to_string(),
            });
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}
