//! worklog core - log event extraction engine
//!
//! Scans a CI runner worker log (`_diag/Worker_*.log`) line by line and
//! extracts structured execution telemetry:
//! - the job (run) id
//! - one span per step, with start/finish times and duration
//! - checkout provenance (repository, ref, path) linked to its span
//!
//! Pipeline: [`line::tokenize`] -> [`marker::MarkerMatcher`] /
//! [`block::BlockCollector`] -> [`tracker::ActionLifecycleTracker`], driven by
//! an [`ExtractionSession`]. [`records::build_batch`] maps the result into
//! records for a telemetry sink.

pub mod block;
pub mod error;
pub mod line;
pub mod logging;
pub mod marker;
pub mod obs;
pub mod records;
pub mod result;
pub mod session;
pub mod span;
pub mod tracker;

pub use error::{ExtractError, Result};
pub use line::{tokenize, LogLine};
pub use logging::init_tracing;
pub use marker::{CheckoutDetail, MarkerEvent, MarkerMatcher, Recognizer};
pub use records::{
    build_batch, CheckoutFields, JobSummaryRecord, StepRecord, StepStatus, TelemetryBatch,
    TelemetryRecord,
};
pub use result::{ExtractionDiagnostics, ExtractionResult};
pub use session::{extract_file, extract_lines, extract_reader, ExtractionSession};
pub use span::{ActionSpan, CheckoutRecord, SpanId, SpanKind};
pub use tracker::{ActionLifecycleTracker, TrackerStats};
