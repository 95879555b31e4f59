//! Marker recognition for tokenized worker log lines.
//!
//! Each recognizer is a pure function `&LogLine -> Option<MarkerEvent>`. The
//! [`MarkerMatcher`] evaluates them in a fixed priority order and returns the
//! first hit, so a generic step pattern can never shadow a more specific one.

use crate::line::LogLine;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

// ============================================================================
// EVENT TYPES
// ============================================================================

/// Source-control provenance announced for a checkout step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutDetail {
    pub repository: String,
    pub git_ref: String,
    pub path: String,
    /// Literal inputs of the checkout action, when known.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// A structured marker recognized in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MarkerEvent {
    /// The runner announced the job (workflow run) id
    JobIdAnnounced { job_id: String },

    /// Provenance for a checkout step
    CheckoutDetail(CheckoutDetail),

    /// A named step began executing
    StepStarted {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A named step finished executing
    StepFinished {
        name: String,
        timestamp: DateTime<Utc>,
    },
}

impl MarkerEvent {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MarkerEvent::JobIdAnnounced { .. } => "job_id_announced",
            MarkerEvent::CheckoutDetail(_) => "checkout_detail",
            MarkerEvent::StepStarted { .. } => "step_started",
            MarkerEvent::StepFinished { .. } => "step_finished",
        }
    }
}

// ============================================================================
// RECOGNIZERS
// ============================================================================

/// A single marker recognizer.
pub type Recognizer = fn(&LogLine) -> Option<MarkerEvent>;

/// Builtin recognizers in priority order.
pub const BUILTIN_RECOGNIZERS: [(&str, Recognizer); 4] = [
    ("job_id", recognize_job_id),
    ("checkout_detail", recognize_checkout_detail),
    ("step_started", recognize_step_started),
    ("step_finished", recognize_step_finished),
];

fn job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Job (?:ID|id:) (?P<id>[\w.-]+)\s*$").expect("job id pattern is valid")
    })
}

fn checkout_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Checkout detail:\s*(?P<fields>.*)$").expect("checkout pattern is valid")
    })
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<key>\w+)=(?:'(?P<quoted>[^']*)'|(?P<bare>[^\s,]+))")
            .expect("field pattern is valid")
    })
}

fn step_started_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Processing step: DisplayName='(?P<name>.+)'\s*$")
            .expect("step started pattern is valid")
    })
}

fn step_finished_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^Finished step: DisplayName='(?P<name>.+)'\s*$")
            .expect("step finished pattern is valid")
    })
}

/// `Job ID <id>`
pub fn recognize_job_id(line: &LogLine) -> Option<MarkerEvent> {
    let caps = job_id_pattern().captures(&line.body)?;
    Some(MarkerEvent::JobIdAnnounced {
        job_id: caps["id"].to_string(),
    })
}

/// `Checkout detail: repository=<r> ref=<ref> path=<path>`
///
/// `repo` is accepted for `repository`. All three fields are required.
pub fn recognize_checkout_detail(line: &LogLine) -> Option<MarkerEvent> {
    let caps = checkout_pattern().captures(&line.body)?;
    let timestamp = line.timestamp?;

    let mut repository = None;
    let mut git_ref = None;
    let mut path = None;
    for field in field_pattern().captures_iter(&caps["fields"]) {
        let value = field
            .name("quoted")
            .or_else(|| field.name("bare"))
            .map(|m| m.as_str().to_string());
        match &field["key"] {
            "repository" | "repo" => repository = value,
            "ref" => git_ref = value,
            "path" => path = value,
            _ => {}
        }
    }

    Some(MarkerEvent::CheckoutDetail(CheckoutDetail {
        repository: repository?,
        git_ref: git_ref?,
        path: path?,
        parameters: BTreeMap::new(),
        timestamp,
    }))
}

/// `Processing step: DisplayName='<name>'`
pub fn recognize_step_started(line: &LogLine) -> Option<MarkerEvent> {
    let caps = step_started_pattern().captures(&line.body)?;
    Some(MarkerEvent::StepStarted {
        name: caps["name"].to_string(),
        timestamp: line.timestamp?,
    })
}

/// `Finished step: DisplayName='<name>'`
pub fn recognize_step_finished(line: &LogLine) -> Option<MarkerEvent> {
    let caps = step_finished_pattern().captures(&line.body)?;
    Some(MarkerEvent::StepFinished {
        name: caps["name"].to_string(),
        timestamp: line.timestamp?,
    })
}

// ============================================================================
// MATCHER
// ============================================================================

/// Ordered set of recognizers; the first match wins.
#[derive(Clone)]
pub struct MarkerMatcher {
    recognizers: Vec<(&'static str, Recognizer)>,
}

impl Default for MarkerMatcher {
    fn default() -> Self {
        Self::new(BUILTIN_RECOGNIZERS.to_vec())
    }
}

impl std::fmt::Debug for MarkerMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.recognizers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("MarkerMatcher")
            .field("recognizers", &names)
            .finish()
    }
}

impl MarkerMatcher {
    /// Create a matcher from recognizers in priority order.
    pub fn new(recognizers: Vec<(&'static str, Recognizer)>) -> Self {
        Self { recognizers }
    }

    /// Names of the configured recognizers, in priority order.
    pub fn recognizer_names(&self) -> Vec<&'static str> {
        self.recognizers.iter().map(|(name, _)| *name).collect()
    }

    /// Return the first event any recognizer produces for `line`.
    pub fn match_line(&self, line: &LogLine) -> Option<MarkerEvent> {
        self.recognizers
            .iter()
            .find_map(|(_, recognize)| recognize(line))
    }
}
