//! The immutable product of one extraction.

use crate::span::{ActionSpan, CheckoutRecord};
use crate::tracker::TrackerStats;
use serde::{Deserialize, Serialize};

/// Counters for everything the session recovered from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionDiagnostics {
    /// Lines read from the source
    pub lines: u64,
    /// Non-blank lines outside any block that had no parsable header
    pub unparsed_lines: u64,
    /// Multi-line payloads that failed to decode
    pub malformed_blocks: u64,
    /// Job id announcements that disagreed with the first one
    pub duplicate_job_ids: u64,
    #[serde(flatten)]
    pub tracker: TrackerStats,
}

/// Everything extracted from one worker log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// First announced job (run) id
    pub job_id: Option<String>,
    /// Main repository of the job, from the job message
    pub repository: Option<String>,
    /// Checkouts in start order of their spans
    pub checkouts: Vec<CheckoutRecord>,
    /// All spans in start order
    pub spans: Vec<ActionSpan>,
    pub diagnostics: ExtractionDiagnostics,
    /// SHA-256 over the source lines
    pub source_digest: String,
}

impl ExtractionResult {
    /// The span a checkout refers to.
    pub fn checkout_span(&self, checkout: &CheckoutRecord) -> Option<&ActionSpan> {
        self.spans.get(checkout.span.0)
    }

    /// Spans that never saw a finish marker.
    pub fn unterminated_spans(&self) -> impl Iterator<Item = &ActionSpan> {
        self.spans.iter().filter(|s| !s.is_terminated())
    }

    /// Nothing was recognized in the source.
    pub fn is_empty(&self) -> bool {
        self.job_id.is_none() && self.spans.is_empty() && self.checkouts.is_empty()
    }
}
