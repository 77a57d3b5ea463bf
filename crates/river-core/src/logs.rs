//! Structured run logs written by plugins.
//!
//! A log is line-delimited JSON. Plugins tend to mix framework chatter into
//! the same stream, so only records tagged `"$report_type": "TestReport"` are
//! kept.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const REPORT_TYPE_KEY: &str = "$report_type";
pub const TEST_REPORT: &str = "TestReport";

/// One finished-test record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredLogRecord {
    #[serde(default)]
    pub nodeid: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Everything else the plugin put in the record.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse log text, keeping only test-report records.
///
/// Unparseable lines are skipped with a warning. `source` names the stream
/// in log output.
pub fn parse_records(source: &str, text: &str) -> Vec<StructuredLogRecord> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut object = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                warn!(source = %source, line = idx + 1, "log line is not a JSON object, skipped");
                continue;
            }
            Err(e) => {
                warn!(source = %source, line = idx + 1, error = %e, "malformed log line skipped");
                continue;
            }
        };

        if object.get(REPORT_TYPE_KEY).and_then(Value::as_str) != Some(TEST_REPORT) {
            continue;
        }
        object.remove(REPORT_TYPE_KEY);

        match serde_json::from_value::<StructuredLogRecord>(Value::Object(object)) {
            Ok(record) => records.push(record),
            Err(e) => warn!(source = %source, line = idx + 1, error = %e, "test report has unexpected shape, skipped"),
        }
    }
    debug!(source = %source, kept = records.len(), "structured log parsed");
    records
}

/// Read and filter a log file. A missing or unreadable file yields `None`.
pub fn read_records(path: &Path) -> Option<Vec<StructuredLogRecord>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(parse_records(&path.display().to_string(), &text)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "structured log not readable");
            None
        }
    }
}

/// Newest `<work_dir>/.json/<generator>*.json`, by modification time.
pub fn latest_generator_log(work_dir: &Path, generator: &str) -> Option<PathBuf> {
    let dir = work_dir.join(".json");
    let entries = std::fs::read_dir(&dir).ok()?;

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(generator) && name.ends_with(".json")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = r#"{"$report_type": "SessionStart", "pytest_version": "7.1"}
{"$report_type": "TestReport", "nodeid": "test_t1", "outcome": "passed", "when": "call", "duration": 0.25, "location": ["a", 1]}
not json at all
[1, 2, 3]

{"$report_type": "CollectReport", "nodeid": "", "outcome": "passed"}
{"$report_type": "TestReport", "nodeid": "test_t2", "outcome": "failed"}
{"$report_type": "SessionFinish", "exitstatus": 1}
"#;

    #[test]
    fn test_only_test_reports_kept() {
        let records = parse_records("dut", MIXED);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].nodeid, "test_t1");
        assert_eq!(records[0].duration, Some(0.25));
        assert_eq!(records[0].when.as_deref(), Some("call"));
        assert!(records[0].extra.contains_key("location"));
        assert!(!records[0].extra.contains_key(REPORT_TYPE_KEY));
        assert_eq!(records[1].outcome, "failed");
        assert_eq!(records[1].duration, None);
    }

    #[test]
    fn test_parse_is_restartable() {
        assert_eq!(parse_records("a", MIXED), parse_records("b", MIXED));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(&dir.path().join("nope.json")).is_none());
    }

    #[test]
    fn test_latest_generator_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest_generator_log(dir.path(), "aapg").is_none());

        let logs = dir.path().join(".json");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("aapg-old.json"), "").unwrap();
        std::fs::write(logs.join("other.json"), "").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(logs.join("aapg-new.json"), "").unwrap();

        let found = latest_generator_log(dir.path(), "aapg").unwrap();
        assert_eq!(found.file_name().unwrap(), "aapg-new.json");
    }
}
