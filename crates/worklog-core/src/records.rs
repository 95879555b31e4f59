//! Outbound telemetry records.
//!
//! [`build_batch`] maps an [`ExtractionResult`] into the shapes a telemetry
//! sink consumes: one job summary plus one record per span. Pure transform,
//! no I/O.

use crate::result::ExtractionResult;
use crate::span::{ActionSpan, CheckoutRecord, SpanKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Per-job summary record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummaryRecord {
    pub job_id: Option<String>,
    pub repository: Option<String>,
    pub total_checkout_count: usize,
    pub total_step_count: usize,
    pub unterminated_step_count: usize,
    pub source_digest: String,
}

/// Whether a step saw its finish marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Finished,
    Unterminated,
}

/// Checkout provenance carried on a step record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutFields {
    pub repository: String,
    pub git_ref: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Per-step record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub kind: SpanKind,
    pub status: StepStatus,
    #[serde(with = "precise_datetime")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "precise_datetime_opt")]
    pub finish_time: Option<DateTime<Utc>>,
    /// `None` for unterminated steps
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutFields>,
}

impl StepRecord {
    fn from_span(span: &ActionSpan, checkout: Option<&CheckoutRecord>) -> Self {
        Self {
            name: span.name.clone(),
            kind: span.kind,
            status: if span.is_terminated() {
                StepStatus::Finished
            } else {
                StepStatus::Unterminated
            },
            start_time: span.start,
            finish_time: span.end,
            duration_ms: span.duration_ms(),
            checkout: checkout.map(|c| CheckoutFields {
                repository: c.repository.clone(),
                git_ref: c.git_ref.clone(),
                path: c.path.clone(),
                parameters: c.parameters.clone(),
            }),
        }
    }
}

/// A single line-oriented record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    JobSummary(JobSummaryRecord),
    Step(StepRecord),
}

/// Everything produced for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryBatch {
    pub summary: JobSummaryRecord,
    pub steps: Vec<StepRecord>,
}

impl TelemetryBatch {
    /// Flatten into records: the summary first, then steps in start order.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        std::iter::once(TelemetryRecord::JobSummary(self.summary.clone()))
            .chain(self.steps.iter().cloned().map(TelemetryRecord::Step))
            .collect()
    }

    /// Number of records [`records`](Self::records) yields.
    pub fn record_count(&self) -> usize {
        1 + self.steps.len()
    }
}

/// Map an extraction result into outbound records.
pub fn build_batch(result: &ExtractionResult) -> TelemetryBatch {
    let by_span: HashMap<usize, &CheckoutRecord> =
        result.checkouts.iter().map(|c| (c.span.0, c)).collect();

    let steps: Vec<StepRecord> = result
        .spans
        .iter()
        .enumerate()
        .map(|(index, span)| StepRecord::from_span(span, by_span.get(&index).copied()))
        .collect();

    TelemetryBatch {
        summary: JobSummaryRecord {
            job_id: result.job_id.clone(),
            repository: result.repository.clone(),
            total_checkout_count: result.checkouts.len(),
            total_step_count: result.spans.len(),
            unterminated_step_count: result.unterminated_spans().count(),
            source_digest: result.source_digest.clone(),
        },
        steps,
    }
}

/// RFC 3339 with every sub-second digit the source had.
mod precise_datetime {
    use super::format_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_timestamp(dt))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

mod precise_datetime_opt {
    use super::format_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match dt {
            Some(dt) => serializer.serialize_some(&format_timestamp(dt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

/// Render a timestamp the way records carry it.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::extract_lines;

    #[test]
    fn test_empty_result_builds_summary_only() {
        let batch = build_batch(&ExtractionResult::default());
        assert_eq!(batch.summary.job_id, None);
        assert_eq!(batch.summary.total_step_count, 0);
        assert_eq!(batch.records().len(), 1);
    }

    #[test]
    fn test_checkout_fields_on_step_record() {
        let result = extract_lines([
            "[2024-05-02 09:00:00Z INFO JobRunner] Job ID 77",
            "[2024-05-02 09:00:01Z INFO StepsRunner] Processing step: DisplayName='Build'",
            "[2024-05-02 09:00:02Z INFO StepsRunner] Processing step: DisplayName='checkout'",
            "[2024-05-02 09:00:02Z INFO ActionRunner] Checkout detail: repository=R ref=main path=./",
            "[2024-05-02 09:00:05Z INFO StepsRunner] Finished step: DisplayName='checkout'",
        ]);
        let batch = build_batch(&result);

        assert_eq!(batch.summary.job_id.as_deref(), Some("77"));
        assert_eq!(batch.summary.total_checkout_count, 1);
        assert_eq!(batch.summary.total_step_count, 2);
        assert_eq!(batch.summary.unterminated_step_count, 1);

        let build = &batch.steps[0];
        assert_eq!(build.status, StepStatus::Unterminated);
        assert_eq!(build.duration_ms, None);
        assert!(build.checkout.is_none());

        let checkout = &batch.steps[1];
        assert_eq!(checkout.status, StepStatus::Finished);
        assert_eq!(checkout.duration_ms, Some(3000));
        assert_eq!(checkout.checkout.as_ref().map(|c| c.repository.as_str()), Some("R"));
    }

    #[test]
    fn test_records_are_tagged() {
        let result = extract_lines([
            "[2024-05-02 09:00:01Z INFO StepsRunner] Processing step: DisplayName='build'",
        ]);
        let records = build_batch(&result).records();
        let json: Vec<serde_json::Value> = records
            .iter()
            .map(|r| serde_json::to_value(r).expect("serialize"))
            .collect();

        assert_eq!(json[0]["type"], "job_summary");
        assert_eq!(json[1]["type"], "step");
        assert_eq!(json[1]["status"], "unterminated");
        assert!(json[1]["finish_time"].is_null());
        assert!(json[1]["duration_ms"].is_null());
    }

    #[test]
    fn test_format_timestamp_keeps_subseconds() {
        let dt = DateTime::parse_from_rfc3339("2024-05-02T09:14:03.1234567Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&dt), "2024-05-02T09:14:03.123456700Z");
    }
}
