//! Action spans and checkout records: the finished products of tracking.

use crate::marker::CheckoutDetail;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a span inside [`ExtractionResult::spans`](crate::ExtractionResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(pub usize);

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "span-{}", self.0)
    }
}

const POST_STEP_PREFIX: &str = "Post ";

/// Category of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Step,
    Checkout,
}

impl SpanKind {
    /// Infer the category from a step name. Post-job cleanup steps
    /// (`Post Run actions/checkout@v4`) are plain steps.
    pub fn infer(name: &str) -> Self {
        if !name.starts_with(POST_STEP_PREFIX) && name.to_ascii_lowercase().contains("checkout") {
            SpanKind::Checkout
        } else {
            SpanKind::Step
        }
    }
}

/// The interval during which one named unit of work executed.
///
/// `end` and `duration` are absent for unterminated spans (no finish marker
/// before end of input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpan {
    pub name: String,
    pub kind: SpanKind,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(rename = "duration_ns", with = "duration_ns_opt")]
    pub duration: Option<Duration>,
}

impl ActionSpan {
    pub(crate) fn closed(
        name: String,
        kind: SpanKind,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name,
            kind,
            start,
            end,
            duration: end.map(|end| end - start),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.end.is_some()
    }

    /// Duration in whole milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration
            .and_then(|d| d.num_milliseconds().try_into().ok())
    }
}

/// A checkout step: provenance plus a reference to its span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub repository: String,
    pub git_ref: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    pub span: SpanId,
}

impl CheckoutRecord {
    pub(crate) fn new(detail: CheckoutDetail, span: SpanId) -> Self {
        Self {
            repository: detail.repository,
            git_ref: detail.git_ref,
            path: detail.path,
            parameters: detail.parameters,
            span,
        }
    }
}

/// Serde helper storing an optional duration as integer nanoseconds.
pub mod duration_ns_opt {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value.and_then(|d| d.num_nanoseconds()) {
            Some(ns) => serializer.serialize_some(&ns),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<i64>::deserialize(deserializer)?.map(Duration::nanoseconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_infer_kind() {
        assert_eq!(SpanKind::infer("Run actions/checkout@v4"), SpanKind::Checkout);
        assert_eq!(SpanKind::infer("CHECKOUT"), SpanKind::Checkout);
        assert_eq!(SpanKind::infer("Build"), SpanKind::Step);
        assert_eq!(SpanKind::infer("Post Run actions/checkout@v4"), SpanKind::Step);
    }

    #[test]
    fn test_closed_span_duration() {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let end = start + Duration::milliseconds(1500);
        let span = ActionSpan::closed("build".to_string(), SpanKind::Step, start, Some(end));

        assert!(span.is_terminated());
        assert_eq!(span.duration, Some(Duration::milliseconds(1500)));
        assert_eq!(span.duration_ms(), Some(1500));
    }

    #[test]
    fn test_unterminated_span() {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let span = ActionSpan::closed("build".to_string(), SpanKind::Step, start, None);

        assert!(!span.is_terminated());
        assert_eq!(span.duration, None);
        assert_eq!(span.duration_ms(), None);
    }

    #[test]
    fn test_duration_serializes_as_nanoseconds() {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let end = start + Duration::nanoseconds(1_234_567_800);
        let span = ActionSpan::closed("build".to_string(), SpanKind::Step, start, Some(end));

        let json = serde_json::to_value(&span).expect("serialize");
        assert_eq!(json["duration_ns"], 1_234_567_800i64);

        let back: ActionSpan = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, span);
    }
}
