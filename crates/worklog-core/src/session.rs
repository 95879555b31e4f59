//! Extraction session: drives one log source from top to bottom.
//!
//! A session owns all of its state (tracker, block collector, job context),
//! so independent sessions can run side by side without synchronization.

use crate::block::{BlockCollector, BlockPayload, CapturedBlock, JobContext, StepTelemetry};
use crate::error::{ExtractError, Result};
use crate::line::{parse_timestamp, tokenize};
use crate::marker::{MarkerEvent, MarkerMatcher};
use crate::obs;
use crate::result::{ExtractionDiagnostics, ExtractionResult};
use crate::tracker::ActionLifecycleTracker;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// Stateful single-pass extraction over a worker log.
pub struct ExtractionSession {
    matcher: MarkerMatcher,
    blocks: BlockCollector,
    tracker: ActionLifecycleTracker,
    context: Option<JobContext>,
    job_id: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
    hasher: Sha256,
    diagnostics: ExtractionDiagnostics,
}

impl Default for ExtractionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionSession {
    pub fn new() -> Self {
        Self::with_matcher(MarkerMatcher::default())
    }

    /// Use a custom recognizer set for single-line markers.
    pub fn with_matcher(matcher: MarkerMatcher) -> Self {
        Self {
            matcher,
            blocks: BlockCollector::new(),
            tracker: ActionLifecycleTracker::new(),
            context: None,
            job_id: None,
            last_timestamp: None,
            hasher: Sha256::new(),
            diagnostics: ExtractionDiagnostics::default(),
        }
    }

    /// Feed the next raw line of the log.
    pub fn feed_line(&mut self, raw: &str) {
        let raw = raw.trim_end_matches(['\r', '\n']);
        self.hasher.update(raw.as_bytes());
        self.hasher.update(b"\n");
        self.diagnostics.lines += 1;

        let line = tokenize(raw, self.last_timestamp);
        if line.parsed {
            self.last_timestamp = line.timestamp;
        }

        if self.blocks.is_capturing() {
            if !line.parsed {
                if let Some(block) = self.blocks.push(&line) {
                    self.apply_block(block);
                }
                return;
            }
            // A new header line ends the open block and is then processed normally.
            if let Some(block) = self.blocks.close() {
                self.apply_block(block);
            }
        }

        if !line.parsed {
            if !raw.trim().is_empty() {
                self.diagnostics.unparsed_lines += 1;
            }
        } else if self.blocks.start(&line) {
            return;
        }

        if let Some(event) = self.matcher.match_line(&line) {
            debug!(kind = event.kind(), line = self.diagnostics.lines, "Marker recognized");
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: MarkerEvent) {
        match event {
            MarkerEvent::JobIdAnnounced { job_id } => self.announce_job_id(job_id),
            other => self.tracker.apply(other),
        }
    }

    fn announce_job_id(&mut self, job_id: String) {
        match &self.job_id {
            None => {
                debug!(job_id = %job_id, "Job id announced");
                self.job_id = Some(job_id);
            }
            Some(current) if *current != job_id => {
                warn!(current = %current, ignored = %job_id, "Conflicting job id announcement ignored");
                self.diagnostics.duplicate_job_ids += 1;
            }
            Some(_) => {}
        }
    }

    fn apply_block(&mut self, block: CapturedBlock) {
        match block.decode() {
            Ok(BlockPayload::JobMessage(context)) => {
                if let Some(job_id) = context.job_id.clone() {
                    self.announce_job_id(job_id);
                }
                if self.context.is_none() {
                    debug!(steps = context.steps.len(), "Job message decoded");
                    self.context = Some(context);
                }
            }
            Ok(BlockPayload::StepTelemetry(telemetry)) => {
                self.apply_step_telemetry(telemetry, block.header_timestamp)
            }
            Err(e) => {
                obs::emit_block_malformed(block.kind.as_str(), &e);
                self.diagnostics.malformed_blocks += 1;
            }
        }
    }

    /// Fold a step telemetry payload into the tracker.
    ///
    /// The step may already be known from single-line markers; the tracker
    /// then reuses that span. Spans are keyed by the runner's step id, so
    /// steps sharing a display name each get their own span. Without a
    /// `startTime` the block header's timestamp stands in.
    fn apply_step_telemetry(&mut self, telemetry: StepTelemetry, header: Option<DateTime<Utc>>) {
        let start = telemetry
            .start_time
            .as_deref()
            .and_then(parse_timestamp)
            .or(header);
        let (Some(step_id), Some(start)) = (telemetry.step_id.as_deref(), start) else {
            warn!(action = ?telemetry.action, "Step telemetry without step id or start time");
            self.diagnostics.malformed_blocks += 1;
            return;
        };
        let finish = telemetry.finish_time.as_deref().and_then(parse_timestamp);

        let empty = JobContext::default();
        let context = self.context.as_ref().unwrap_or(&empty);
        let step = context.step(step_id);
        let name = step.map_or(step_id, |s| s.name.as_str());

        let seq = self.tracker.claim_step(step_id, name, start);
        if telemetry.is_checkout() {
            let detail = context.checkout_detail(step, start);
            self.tracker.attach_checkout_at(seq, detail);
        }
        if let Some(finish) = finish {
            self.tracker.close_at(seq, finish);
        }
    }

    /// Finalize: close any open block and span and build the result.
    pub fn finish(mut self) -> ExtractionResult {
        if let Some(block) = self.blocks.close() {
            self.apply_block(block);
        }

        let output = self.tracker.finish();
        let mut diagnostics = self.diagnostics;
        diagnostics.tracker = output.stats;

        let result = ExtractionResult {
            job_id: self.job_id,
            repository: self.context.and_then(|c| c.repository),
            checkouts: output.checkouts,
            spans: output.spans,
            diagnostics,
            source_digest: hex::encode(self.hasher.finalize()),
        };
        obs::emit_extraction_finished(&result);
        result
    }
}

/// Extract from an in-memory sequence of lines.
pub fn extract_lines<I, S>(lines: I) -> ExtractionResult
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut session = ExtractionSession::new();
    for line in lines {
        session.feed_line(line.as_ref());
    }
    session.finish()
}

/// Extract from a buffered reader. Invalid UTF-8 is replaced, not fatal.
pub fn extract_reader<R: BufRead>(mut reader: R) -> Result<ExtractionResult> {
    let mut session = ExtractionSession::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        session.feed_line(&String::from_utf8_lossy(&buf));
    }
    Ok(session.finish())
}

/// Extract from a file on disk. The handle is released on every exit path.
pub fn extract_file(path: &Path) -> Result<ExtractionResult> {
    let source = path.display().to_string();
    let _span = obs::ExtractionSpan::enter(&source);
    obs::emit_extraction_started(&source);

    let file = File::open(path).map_err(|source| ExtractError::InputUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    extract_reader(BufReader::new(file)).map_err(|e| match e {
        ExtractError::Read(source) => ExtractError::InputUnavailable {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}
