//! Multi-line JSON payloads embedded in the worker log.
//!
//! The runner dumps two kinds of JSON documents across several unprefixed
//! lines:
//!
//! - the **job message** after `[... INFO Worker] Job message:`, carrying the
//!   run id, the main repository and the job's step definitions;
//! - **step telemetry** after `[... INFO ExecutionContext] Publish step
//!   telemetry for current step {`, closed by a line ending in `}.`, carrying
//!   the step's action and its start/finish times.
//!
//! [`BlockCollector`] accumulates those lines; [`CapturedBlock::decode`] turns
//! them into typed payloads.

use crate::line::LogLine;
use crate::marker::CheckoutDetail;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

const JOB_MESSAGE_HEADER: &str = "Job message:";
const STEP_TELEMETRY_HEADER: &str = "Publish step telemetry for current step {";
const ACCESS_TOKEN_KEY: &str = "\"AccessToken\"";
const CHECKOUT_ACTION: &str = "actions/checkout";

/// Kind of multi-line payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    JobMessage,
    StepTelemetry,
}

impl BlockKind {
    /// Recognize a block header line.
    pub fn from_header(line: &LogLine) -> Option<Self> {
        if !line.parsed {
            return None;
        }
        let body = line.body.trim_end();
        if body.starts_with(JOB_MESSAGE_HEADER) {
            Some(BlockKind::JobMessage)
        } else if body.ends_with(STEP_TELEMETRY_HEADER) {
            Some(BlockKind::StepTelemetry)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::JobMessage => "job_message",
            BlockKind::StepTelemetry => "step_telemetry",
        }
    }
}

/// A completed block, ready to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBlock {
    pub kind: BlockKind,
    pub header_timestamp: Option<DateTime<Utc>>,
    pub payload: String,
}

/// Accumulates the lines of at most one open block.
#[derive(Debug, Default)]
pub struct BlockCollector {
    open: Option<CapturedBlock>,
}

impl BlockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.open.is_some()
    }

    /// Open a block if `line` is a block header. Returns whether it was.
    pub fn start(&mut self, line: &LogLine) -> bool {
        let Some(kind) = BlockKind::from_header(line) else {
            return false;
        };

        // Step telemetry opens its object on the header line itself.
        let payload = match kind {
            BlockKind::JobMessage => line.body[JOB_MESSAGE_HEADER.len()..].trim().to_string(),
            BlockKind::StepTelemetry => "{".to_string(),
        };
        self.open = Some(CapturedBlock {
            kind,
            header_timestamp: line.timestamp,
            payload,
        });
        true
    }

    /// Append a continuation line. Returns the block when the line terminates it.
    pub fn push(&mut self, line: &LogLine) -> Option<CapturedBlock> {
        let block = self.open.as_mut()?;
        let content = line.raw.trim();

        if content.starts_with(ACCESS_TOKEN_KEY) {
            return None;
        }

        if block.kind == BlockKind::StepTelemetry && content.ends_with("}.") {
            block.payload.push_str(&content[..content.len() - 1]);
            return self.open.take();
        }

        block.payload.push_str(content);
        None
    }

    /// Close the open block, if any.
    pub fn close(&mut self) -> Option<CapturedBlock> {
        self.open.take()
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Decoded block payload.
#[derive(Debug, Clone)]
pub enum BlockPayload {
    JobMessage(JobContext),
    StepTelemetry(StepTelemetry),
}

impl CapturedBlock {
    pub fn decode(&self) -> Result<BlockPayload, serde_json::Error> {
        match self.kind {
            BlockKind::JobMessage => {
                let message: JobMessage = serde_json::from_str(&self.payload)?;
                Ok(BlockPayload::JobMessage(JobContext::from_message(message)))
            }
            BlockKind::StepTelemetry => {
                Ok(BlockPayload::StepTelemetry(serde_json::from_str(&self.payload)?))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobMessage {
    #[serde(rename = "contextData", default)]
    context_data: Option<ContextData>,
    #[serde(default)]
    steps: Vec<JobStepDefinition>,
}

#[derive(Debug, Deserialize)]
struct ContextData {
    #[serde(default)]
    github: Option<DictionaryContext>,
}

#[derive(Debug, Deserialize)]
struct DictionaryContext {
    #[serde(default)]
    d: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    k: String,
    v: Value,
}

#[derive(Debug, Deserialize)]
struct JobStepDefinition {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    inputs: Option<Value>,
}

/// A step definition from the job message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStep {
    pub id: String,
    pub name: String,
    /// Literal `key: value` inputs of the step.
    pub inputs: BTreeMap<String, String>,
}

/// What the job message tells us about the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: Option<String>,
    pub repository: Option<String>,
    pub git_ref: Option<String>,
    pub steps: HashMap<String, JobStep>,
}

impl JobContext {
    fn from_message(message: JobMessage) -> Self {
        let entries = message
            .context_data
            .and_then(|c| c.github)
            .map(|g| g.d)
            .unwrap_or_default();
        let lookup = |key: &str| {
            entries
                .iter()
                .find(|e| e.k == key)
                .and_then(|e| scalar_string(&e.v))
        };

        let steps = message
            .steps
            .into_iter()
            .map(|step| {
                let name = step
                    .display_name
                    .or(step.name)
                    .unwrap_or_else(|| step.id.clone());
                let inputs = step.inputs.as_ref().map(literal_inputs).unwrap_or_default();
                (
                    step.id.clone(),
                    JobStep {
                        id: step.id,
                        name,
                        inputs,
                    },
                )
            })
            .collect();

        JobContext {
            job_id: lookup("run_id"),
            repository: lookup("repository"),
            git_ref: lookup("ref"),
            steps,
        }
    }

    pub fn step(&self, id: &str) -> Option<&JobStep> {
        self.steps.get(id)
    }

    /// Provenance for a checkout step. Missing inputs fall back to the job's
    /// own repository and ref.
    pub fn checkout_detail(&self, step: Option<&JobStep>, timestamp: DateTime<Utc>) -> CheckoutDetail {
        let parameters = step.map(|s| s.inputs.clone()).unwrap_or_default();
        let input = |key: &str| parameters.get(key).cloned();

        CheckoutDetail {
            repository: input("repository")
                .or_else(|| self.repository.clone())
                .unwrap_or_default(),
            git_ref: input("ref")
                .or_else(|| self.git_ref.clone())
                .unwrap_or_default(),
            path: input("path").unwrap_or_default(),
            timestamp,
            parameters,
        }
    }
}

/// Telemetry the runner publishes when a step completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTelemetry {
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub finish_time: Option<String>,
}

impl StepTelemetry {
    pub fn is_checkout(&self) -> bool {
        self.action.as_deref() == Some(CHECKOUT_ACTION)
    }
}

/// `{"map": [{"key": {"lit": k}, "value": {"lit": v}}, ...]}` -> `{k: v}`
fn literal_inputs(inputs: &Value) -> BTreeMap<String, String> {
    inputs
        .get("map")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let key = item.get("key")?.get("lit")?.as_str()?;
                    let value = item.get("value")?.get("lit")?.as_str()?;
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::tokenize;

    fn feed(collector: &mut BlockCollector, raw: &str) -> Option<CapturedBlock> {
        let line = tokenize(raw, None);
        if line.parsed {
            let closed = collector.close();
            collector.start(&line);
            closed
        } else {
            collector.push(&line)
        }
    }

    #[test]
    fn test_step_telemetry_block_terminates_on_dot() {
        let mut collector = BlockCollector::new();
        assert!(feed(
            &mut collector,
            "[2024-05-02 09:14:09Z INFO ExecutionContext] Publish step telemetry for current step {"
        )
        .is_none());
        assert!(collector.is_capturing());
        assert!(feed(&mut collector, "  \"action\": \"actions/checkout\",").is_none());
        assert!(feed(&mut collector, "  \"stepId\": \"s-1\"").is_none());

        let block = feed(&mut collector, "}.").expect("block closed");
        assert_eq!(block.kind, BlockKind::StepTelemetry);
        assert!(!collector.is_capturing());

        match block.decode().expect("decodes") {
            BlockPayload::StepTelemetry(t) => {
                assert!(t.is_checkout());
                assert_eq!(t.step_id.as_deref(), Some("s-1"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_access_token_lines_are_skipped() {
        let mut collector = BlockCollector::new();
        let header = tokenize("[2024-05-02 09:14:00Z INFO Worker] Job message:", None);
        assert!(collector.start(&header));
        collector.push(&tokenize("{", None));
        collector.push(&tokenize("  \"AccessToken\": \"secret\",", None));
        collector.push(&tokenize("  \"steps\": []", None));
        collector.push(&tokenize("}", None));

        let block = collector.close().expect("open block");
        assert!(!block.payload.contains("secret"));
        assert!(block.decode().is_ok());
    }

    #[test]
    fn test_job_message_context() {
        let payload = r#"{
            "contextData": {"github": {"t": 2, "d": [
                {"k": "run_id", "v": "9001"},
                {"k": "repository", "v": "octo/app"},
                {"k": "ref", "v": "refs/heads/main"}
            ]}},
            "steps": [
                {"id": "s-1", "name": "Run actions/checkout@v4", "inputs": {"type": 2, "map": [
                    {"key": {"type": 0, "lit": "repository"}, "value": {"type": 0, "lit": "octo/lib"}},
                    {"key": {"type": 0, "lit": "path"}, "value": {"type": 0, "lit": "lib"}}
                ]}},
                {"id": "s-2", "name": "Build"}
            ]
        }"#;
        let block = CapturedBlock {
            kind: BlockKind::JobMessage,
            header_timestamp: None,
            payload: payload.to_string(),
        };

        let ctx = match block.decode().expect("decodes") {
            BlockPayload::JobMessage(ctx) => ctx,
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(ctx.job_id.as_deref(), Some("9001"));
        assert_eq!(ctx.repository.as_deref(), Some("octo/app"));

        let checkout = ctx.step("s-1").expect("step s-1");
        assert_eq!(checkout.name, "Run actions/checkout@v4");
        assert_eq!(checkout.inputs.get("path").map(String::as_str), Some("lib"));

        let detail = ctx.checkout_detail(Some(checkout), Utc::now());
        assert_eq!(detail.repository, "octo/lib");
        assert_eq!(detail.git_ref, "refs/heads/main");
        assert_eq!(detail.path, "lib");
        assert_eq!(detail.parameters.len(), 2);

        let fallback = ctx.checkout_detail(ctx.step("s-2"), Utc::now());
        assert_eq!(fallback.repository, "octo/app");
        assert!(fallback.path.is_empty());
    }

    #[test]
    fn test_numeric_run_id() {
        let block = CapturedBlock {
            kind: BlockKind::JobMessage,
            header_timestamp: None,
            payload: r#"{"contextData": {"github": {"d": [{"k": "run_id", "v": 77}]}}}"#.to_string(),
        };
        match block.decode().expect("decodes") {
            BlockPayload::JobMessage(ctx) => assert_eq!(ctx.job_id.as_deref(), Some("77")),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let block = CapturedBlock {
            kind: BlockKind::StepTelemetry,
            header_timestamp: None,
            payload: "{\"stepId\": ".to_string(),
        };
        assert!(block.decode().is_err());
    }

    #[test]
    fn test_plain_line_is_not_a_header() {
        let line = tokenize("[2024-05-02 09:14:00Z INFO Worker] Waiting for job", None);
        assert_eq!(BlockKind::from_header(&line), None);
    }
}
