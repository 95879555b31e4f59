//! Action lifecycle tracking.
//!
//! Consumes the ordered stream of [`MarkerEvent`]s and produces closed
//! [`ActionSpan`]s. Open spans live in an in-flight stack (open order, names
//! unique); once closed they are moved into the finalized list and only
//! touched again to attach late checkout provenance or a runner step id.

use crate::marker::{CheckoutDetail, MarkerEvent};
use crate::span::{ActionSpan, CheckoutRecord, SpanId, SpanKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Anomalies the tracker recovered from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// Finish markers with no matching in-flight start
    pub orphan_finishes: u64,
    /// Checkout details never correlated with a span
    pub orphan_checkout_details: u64,
    /// Checkout details for a span that already had provenance
    pub duplicate_checkout_details: u64,
    /// In-flight spans closed because their name started again
    pub replaced_spans: u64,
    /// Spans without a finish at end of input
    pub unterminated_spans: u64,
}

#[derive(Debug)]
struct OpenSpan {
    seq: usize,
    name: String,
    kind: SpanKind,
    start: DateTime<Utc>,
    step_id: Option<String>,
    checkout: Option<CheckoutDetail>,
}

#[derive(Debug)]
struct ClosedSpan {
    seq: usize,
    span: ActionSpan,
    step_id: Option<String>,
    checkout: Option<CheckoutDetail>,
    /// Closed from step telemetry; a later `Finished step` line confirms it.
    awaits_finish_line: bool,
}

impl OpenSpan {
    fn close(self, end: Option<DateTime<Utc>>) -> ClosedSpan {
        ClosedSpan {
            seq: self.seq,
            span: ActionSpan::closed(self.name, self.kind, self.start, end),
            step_id: self.step_id,
            checkout: self.checkout,
            awaits_finish_line: false,
        }
    }
}

/// Binding of a span to a runner step id is free, or already this step.
fn claimable(bound: Option<&str>, step_id: &str) -> bool {
    bound.map_or(true, |id| id == step_id)
}

/// Spans and checkouts produced by [`ActionLifecycleTracker::finish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerOutput {
    /// Spans in start order
    pub spans: Vec<ActionSpan>,
    /// Checkouts in start order of their spans
    pub checkouts: Vec<CheckoutRecord>,
    pub stats: TrackerStats,
}

/// State machine turning step markers into spans.
///
/// Spans are addressed by name for single-line markers and by a sequence
/// number (open order) once a runner step id has claimed them.
#[derive(Debug, Default)]
pub struct ActionLifecycleTracker {
    in_flight: Vec<OpenSpan>,
    finalized: Vec<ClosedSpan>,
    pending_checkouts: VecDeque<CheckoutDetail>,
    next_seq: usize,
    stats: TrackerStats,
}

impl ActionLifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    pub fn apply(&mut self, event: MarkerEvent) {
        match event {
            MarkerEvent::StepStarted { name, timestamp } => {
                self.open(name, timestamp, None);
            }
            MarkerEvent::StepFinished { name, timestamp } => self.finish_step(&name, timestamp),
            MarkerEvent::CheckoutDetail(detail) => self.checkout(detail),
            // The job id is session state, not span state.
            MarkerEvent::JobIdAnnounced { .. } => {}
        }
    }

    /// Find or open the span for runner step `step_id` and return its
    /// sequence number.
    ///
    /// Reuses the newest span named `name` that is unbound or already bound
    /// to this step: in flight first, then closed. Otherwise a new span opens
    /// at `start`. A span bound to another step id is never reused, so steps
    /// sharing a display name stay separate.
    pub fn claim_step(&mut self, step_id: &str, name: &str, start: DateTime<Utc>) -> usize {
        if let Some(open) = self
            .in_flight
            .iter_mut()
            .rev()
            .find(|s| s.name == name && claimable(s.step_id.as_deref(), step_id))
        {
            open.step_id = Some(step_id.to_string());
            return open.seq;
        }
        if let Some(closed) = self
            .finalized
            .iter_mut()
            .rev()
            .find(|s| s.span.name == name && claimable(s.step_id.as_deref(), step_id))
        {
            closed.step_id = Some(step_id.to_string());
            return closed.seq;
        }
        self.open(name.to_string(), start, Some(step_id.to_string()))
    }

    fn open(&mut self, name: String, timestamp: DateTime<Utc>, step_id: Option<String>) -> usize {
        if let Some(pos) = self.in_flight.iter().position(|s| s.name == name) {
            let prior = self.in_flight.remove(pos);
            warn!(step = %name, started = %prior.start, "Step restarted before finishing; closing prior span as unterminated");
            self.stats.replaced_spans += 1;
            self.finalized.push(prior.close(None));
        }

        let kind = SpanKind::infer(&name);
        let checkout = if kind == SpanKind::Checkout {
            self.pending_checkouts.pop_front()
        } else {
            None
        };

        let seq = self.next_seq;
        debug!(step = %name, start = %timestamp, seq, "Step started");
        self.in_flight.push(OpenSpan {
            seq,
            name,
            kind,
            start: timestamp,
            step_id,
            checkout,
        });
        self.next_seq += 1;
        seq
    }

    fn finish_step(&mut self, name: &str, timestamp: DateTime<Utc>) {
        let Some(pos) = self.in_flight.iter().position(|s| s.name == name) else {
            if let Some(closed) = self
                .finalized
                .iter_mut()
                .rev()
                .find(|s| s.span.name == name && s.awaits_finish_line)
            {
                debug!(step = %name, "Finish marker for a step already closed by telemetry");
                closed.awaits_finish_line = false;
                return;
            }
            warn!(step = %name, "Finish marker without a matching start; dropped");
            self.stats.orphan_finishes += 1;
            return;
        };
        self.close_in_flight(pos, timestamp);
    }

    /// Close the span with sequence number `seq` at `timestamp`. Closing an
    /// already closed span is a no-op.
    pub fn close_at(&mut self, seq: usize, timestamp: DateTime<Utc>) {
        let Some(pos) = self.in_flight.iter().position(|s| s.seq == seq) else {
            return;
        };
        if self.close_in_flight(pos, timestamp) {
            if let Some(closed) = self.finalized.last_mut() {
                closed.awaits_finish_line = true;
            }
        }
    }

    fn close_in_flight(&mut self, pos: usize, timestamp: DateTime<Utc>) -> bool {
        let open = &self.in_flight[pos];
        if timestamp < open.start {
            warn!(step = %open.name, finished = %timestamp, "Finish marker precedes start; dropped");
            self.stats.orphan_finishes += 1;
            return false;
        }

        let open = self.in_flight.remove(pos);
        debug!(step = %open.name, duration_ms = (timestamp - open.start).num_milliseconds(), "Step finished");
        self.finalized.push(open.close(Some(timestamp)));
        true
    }

    /// Correlate a checkout detail with a span.
    ///
    /// Preference: the newest in-flight checkout span, then the newest
    /// in-flight span of any kind, then the most recently closed span if it
    /// is a checkout still lacking provenance. Otherwise the detail waits for
    /// the next checkout span to open.
    fn checkout(&mut self, detail: CheckoutDetail) {
        let target = self
            .in_flight
            .iter()
            .rposition(|s| s.kind == SpanKind::Checkout)
            .or_else(|| self.in_flight.len().checked_sub(1));

        if let Some(pos) = target {
            let open = &mut self.in_flight[pos];
            attach(&mut self.stats, &open.name, &mut open.kind, &mut open.checkout, detail);
            return;
        }

        if let Some(last) = self.finalized.last_mut() {
            if last.span.kind == SpanKind::Checkout && last.checkout.is_none() {
                debug!(step = %last.span.name, "Attaching checkout detail to finished span");
                last.checkout = Some(detail);
                return;
            }
        }

        debug!(repository = %detail.repository, "Buffering checkout detail until a checkout step opens");
        self.pending_checkouts.push_back(detail);
    }

    /// Attach provenance to the span with sequence number `seq`, in flight or
    /// closed. Falls back to regular correlation when no such span exists.
    pub fn attach_checkout_at(&mut self, seq: usize, detail: CheckoutDetail) {
        if let Some(open) = self.in_flight.iter_mut().find(|s| s.seq == seq) {
            attach(&mut self.stats, &open.name, &mut open.kind, &mut open.checkout, detail);
        } else if let Some(closed) = self.finalized.iter_mut().find(|s| s.seq == seq) {
            attach(
                &mut self.stats,
                &closed.span.name,
                &mut closed.span.kind,
                &mut closed.checkout,
                detail,
            );
        } else {
            self.checkout(detail);
        }
    }

    /// Close everything still open and emit spans in start order.
    pub fn finish(mut self) -> TrackerOutput {
        for open in std::mem::take(&mut self.in_flight) {
            debug!(step = %open.name, "Step never finished; closing as unterminated");
            self.finalized.push(open.close(None));
        }

        if !self.pending_checkouts.is_empty() {
            warn!(
                count = self.pending_checkouts.len(),
                "Checkout details never matched a checkout step"
            );
            self.stats.orphan_checkout_details += self.pending_checkouts.len() as u64;
        }

        self.finalized.sort_by_key(|c| c.seq);

        let mut spans = Vec::with_capacity(self.finalized.len());
        let mut checkouts = Vec::new();
        for (index, closed) in self.finalized.into_iter().enumerate() {
            if let Some(detail) = closed.checkout {
                checkouts.push(CheckoutRecord::new(detail, SpanId(index)));
            }
            spans.push(closed.span);
        }

        self.stats.unterminated_spans = spans.iter().filter(|s| !s.is_terminated()).count() as u64;

        TrackerOutput {
            spans,
            checkouts,
            stats: self.stats,
        }
    }
}

fn attach(
    stats: &mut TrackerStats,
    name: &str,
    kind: &mut SpanKind,
    slot: &mut Option<CheckoutDetail>,
    detail: CheckoutDetail,
) {
    if slot.is_some() {
        debug!(step = %name, "Span already has checkout provenance; ignoring duplicate");
        stats.duplicate_checkout_details += 1;
        return;
    }
    debug!(step = %name, repository = %detail.repository, "Checkout detail attached");
    *kind = SpanKind::Checkout;
    *slot = Some(detail);
}
