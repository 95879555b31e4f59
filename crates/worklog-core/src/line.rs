//! Line tokenizer for runner worker logs.
//!
//! Worker log lines carry a bracketed header followed by a free-text body:
//!
//! ```text
//! [2024-05-02 09:14:03Z INFO StepsRunner] Processing step: DisplayName='Build'
//! ```
//!
//! Continuation lines (JSON payloads, wrapped messages) have no header. They
//! are returned unparsed and inherit the previous line's timestamp so the scan
//! never has to stop on a malformed line.

use chrono::{DateTime, NaiveDateTime, Utc};

/// One tokenized line of a worker log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Header timestamp, or the previous line's timestamp for unparsed lines.
    /// `None` only until the first parsable header has been seen.
    pub timestamp: Option<DateTime<Utc>>,

    /// Whether the bracketed header was recognized.
    pub parsed: bool,

    /// Log level (`INFO`, `WARN`, ...). Empty for unparsed lines.
    pub level: String,

    /// Logger category (`Worker`, `StepsRunner`, ...). Empty for unparsed lines.
    pub category: String,

    /// Message body; the full raw text for unparsed lines.
    pub body: String,

    /// The line as read, without its line terminator.
    pub raw: String,
}

/// Split a raw line into a [`LogLine`].
///
/// `previous` is the timestamp of the preceding line and is reused when the
/// header cannot be parsed.
pub fn tokenize(raw: &str, previous: Option<DateTime<Utc>>) -> LogLine {
    let raw = raw.trim_end_matches(['\r', '\n']);

    match split_header(raw) {
        Some((timestamp, level, category, body)) => LogLine {
            timestamp: Some(timestamp),
            parsed: true,
            level: level.to_string(),
            category: category.to_string(),
            body: body.to_string(),
            raw: raw.to_string(),
        },
        None => LogLine {
            timestamp: previous,
            parsed: false,
            level: String::new(),
            category: String::new(),
            body: raw.to_string(),
            raw: raw.to_string(),
        },
    }
}

/// Parse a runner timestamp.
///
/// Accepts the header form `2024-05-02 09:14:03Z` (optionally with a
/// fractional second) and RFC 3339 as used inside JSON payloads.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = value.strip_suffix('Z').unwrap_or(value);
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

fn split_header(raw: &str) -> Option<(DateTime<Utc>, &str, &str, &str)> {
    let rest = raw.strip_prefix('[')?;
    let (header, body) = rest.split_once(']')?;

    let mut parts = header.rsplitn(3, ' ');
    let category = parts.next()?;
    let level = parts.next()?;
    let stamp = parts.next()?;

    if category.is_empty() || level.is_empty() || !level.chars().all(|c| c.is_ascii_uppercase())
    {
        return None;
    }

    let timestamp = parse_timestamp(stamp)?;
    Some((timestamp, level, category, body.strip_prefix(' ').unwrap_or(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tokenize_header_line() {
        let line = tokenize(
            "[2024-05-02 09:14:03Z INFO StepsRunner] Processing step: DisplayName='Build'\n",
            None,
        );

        assert!(line.parsed);
        assert_eq!(
            line.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 14, 3).unwrap())
        );
        assert_eq!(line.level, "INFO");
        assert_eq!(line.category, "StepsRunner");
        assert_eq!(line.body, "Processing step: DisplayName='Build'");
        assert!(!line.raw.ends_with('\n'));
    }

    #[test]
    fn test_tokenize_fractional_seconds() {
        let line = tokenize("[2024-05-02 09:14:03.250Z WARN Worker] slow", None);
        let ts = line.timestamp.expect("timestamp");
        assert_eq!(ts.timestamp_subsec_millis(), 250);
        assert_eq!(line.level, "WARN");
    }

    #[test]
    fn test_tokenize_empty_body() {
        let line = tokenize("[2024-05-02 09:14:03Z INFO Worker]", None);
        assert!(line.parsed);
        assert_eq!(line.body, "");
    }

    #[test]
    fn test_unparsed_line_reuses_previous_timestamp() {
        let previous = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let line = tokenize("  \"run_id\": \"42\",", Some(previous));

        assert!(!line.parsed);
        assert_eq!(line.timestamp, Some(previous));
        assert_eq!(line.body, "  \"run_id\": \"42\",");
        assert!(line.category.is_empty());
    }

    #[test]
    fn test_unparsed_first_line_has_no_timestamp() {
        let line = tokenize("garbage", None);
        assert!(!line.parsed);
        assert_eq!(line.timestamp, None);
    }

    #[test]
    fn test_bracketed_json_is_not_a_header() {
        let line = tokenize("[\"a\", \"b\"]", None);
        assert!(!line.parsed);
    }

    #[test]
    fn test_bad_timestamp_is_unparsed() {
        let line = tokenize("[yesterday INFO Worker] hello", None);
        assert!(!line.parsed);
        assert_eq!(line.body, "[yesterday INFO Worker] hello");
    }

    #[test]
    fn test_parse_timestamp_rfc3339_keeps_precision() {
        let ts = parse_timestamp("2024-05-02T09:14:03.1234567Z").expect("rfc3339");
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_700);
    }
}
