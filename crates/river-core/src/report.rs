//! Run report.
//!
//! A compile run ends with `reports/report_<YYYYmmdd-HHMMSS>.html` plus a
//! shared `reports/style.css` under the output directory. Counts always come
//! from the test list; plugin logs only add per-test detail.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use river_plugin::{ResultCounts, TestList, TestResult};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ReportError;
use crate::logs::{read_records, StructuredLogRecord};
use crate::obs::emit_report_written;
use crate::spec::RunSpec;

pub const REPORTS_DIR: &str = "reports";
pub const STYLESHEET: &str = "style.css";
pub const REPORT_TITLE: &str = "RiVer Core Verification Report";

const STYLE_CSS: &str = r#"body { font-family: sans-serif; margin: 2em; color: #222; }
h1 { border-bottom: 2px solid #444; padding-bottom: 0.2em; }
table { border-collapse: collapse; margin: 1em 0; }
th, td { border: 1px solid #bbb; padding: 0.3em 0.8em; text-align: left; }
th { background: #eee; }
.Passed, .passed { color: #1a7f37; font-weight: bold; }
.Failed, .failed { color: #cf222e; font-weight: bold; }
.Unavailable, .skipped { color: #9a6700; }
.summary td { font-size: 1.2em; }
"#;

/// Log files feeding one report.
#[derive(Debug, Clone, Default)]
pub struct LogSources {
    pub generator: Vec<PathBuf>,
    pub dut: Vec<PathBuf>,
    pub reference: Vec<PathBuf>,
}

/// One row of the per-test table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRow {
    pub name: String,
    pub work_dir: PathBuf,
    pub result: TestResult,
}

/// Everything a report shows. Built once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub title: String,
    pub generated_at: DateTime<Local>,
    pub version: String,
    pub isa: String,
    pub generators: Vec<String>,
    pub duts: Vec<String>,
    pub references: Vec<String>,
    pub config_digest: String,
    pub counts: ResultCounts,
    pub tests: Vec<TestRow>,
    pub generator_logs: Vec<StructuredLogRecord>,
    pub dut_logs: Vec<StructuredLogRecord>,
    pub reference_logs: Vec<StructuredLogRecord>,
}

impl ReportData {
    pub fn new(
        spec: &RunSpec,
        results: &TestList,
        logs: &LogSources,
        generated_at: DateTime<Local>,
    ) -> Self {
        let tests = results
            .iter()
            .map(|(name, entry)| TestRow {
                name: name.to_string(),
                work_dir: entry.work_dir().to_path_buf(),
                result: entry.result(),
            })
            .collect();

        Self {
            title: REPORT_TITLE.to_string(),
            generated_at,
            version: env!("CARGO_PKG_VERSION").to_string(),
            isa: spec.isa.clone(),
            generators: spec.generators.clone(),
            duts: spec.duts.clone(),
            references: spec.references.clone(),
            config_digest: spec.config_digest.clone(),
            counts: results.counts(),
            tests,
            generator_logs: logs.generator.iter().flat_map(|p| collect(p)).collect(),
            dut_logs: logs.dut.iter().flat_map(|p| collect(p)).collect(),
            reference_logs: logs.reference.iter().flat_map(|p| collect(p)).collect(),
        }
    }

    /// Render as a standalone HTML page linking `style.css`.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
        html.push_str("<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(&self.title)));
        html.push_str(&format!("<link rel=\"stylesheet\" href=\"{STYLESHEET}\">\n"));
        html.push_str("</head>\n<body>\n");
        html.push_str(&format!("<h1>{}</h1>\n", escape_html(&self.title)));

        html.push_str("<table>\n");
        for (label, value) in [
            ("Date", self.generated_at.format("%d-%m-%Y").to_string()),
            ("Time", self.generated_at.format("%H:%M").to_string()),
            ("Version", self.version.clone()),
            ("ISA", self.isa.clone()),
            ("DUT", self.duts.join(", ")),
            ("Generator", self.generators.join(", ")),
            ("Reference", self.references.join(", ")),
            ("Config fingerprint", self.config_digest.clone()),
        ] {
            html.push_str(&format!("<tr><th>{label}</th><td>{}</td></tr>\n", escape_html(&value)));
        }
        html.push_str("</table>\n");

        let c = &self.counts;
        html.push_str("<h2>Summary</h2>\n<table class=\"summary\">\n");
        html.push_str("<tr><th>Total</th><th>Passed</th><th>Failed</th><th>Unavailable</th></tr>\n");
        html.push_str(&format!(
            "<tr><td>{}</td><td class=\"Passed\">{}</td><td class=\"Failed\">{}</td><td class=\"Unavailable\">{}</td></tr>\n",
            c.total, c.passed, c.failed, c.unavailable
        ));
        html.push_str("</table>\n");

        html.push_str("<h2>Tests</h2>\n<table>\n");
        html.push_str("<tr><th>Test</th><th>Work directory</th><th>Result</th></tr>\n");
        for row in &self.tests {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td class=\"{result}\">{result}</td></tr>\n",
                escape_html(&row.name),
                escape_html(&row.work_dir.display().to_string()),
                result = row.result,
            ));
        }
        html.push_str("</table>\n");

        for (heading, records) in [
            ("Generator log", &self.generator_logs),
            ("DUT log", &self.dut_logs),
            ("Reference log", &self.reference_logs),
        ] {
            render_records(&mut html, heading, records);
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

fn collect(path: &Path) -> Vec<StructuredLogRecord> {
    read_records(path).unwrap_or_default()
}

fn render_records(html: &mut String, heading: &str, records: &[StructuredLogRecord]) {
    html.push_str(&format!("<h2>{heading}</h2>\n"));
    if records.is_empty() {
        html.push_str("<p>No records.</p>\n");
        return;
    }
    html.push_str("<table>\n<tr><th>Node</th><th>Outcome</th><th>Duration (s)</th></tr>\n");
    for record in records {
        let duration = record
            .duration
            .map(|d| format!("{d:.3}"))
            .unwrap_or_default();
        let outcome = escape_html(&record.outcome);
        html.push_str(&format!(
            "<tr><td>{}</td><td class=\"{outcome}\">{outcome}</td><td>{duration}</td></tr>\n",
            escape_html(&record.nodeid),
        ));
    }
    html.push_str("</table>\n");
}

/// Minimal HTML text escaping.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Writes report artifacts under `<output_dir>/reports`.
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    reports_dir: PathBuf,
}

impl ReportAggregator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            reports_dir: output_dir.join(REPORTS_DIR),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Build and persist a report stamped with the current local time.
    pub fn build(
        &self,
        spec: &RunSpec,
        results: &TestList,
        logs: &LogSources,
    ) -> Result<PathBuf, ReportError> {
        self.build_at(Local::now(), spec, results, logs)
    }

    /// Build and persist a report stamped with `now`. Never overwrites an
    /// earlier report.
    pub fn build_at(
        &self,
        now: DateTime<Local>,
        spec: &RunSpec,
        results: &TestList,
        logs: &LogSources,
    ) -> Result<PathBuf, ReportError> {
        let data = ReportData::new(spec, results, logs, now);

        std::fs::create_dir_all(&self.reports_dir).map_err(|source| ReportError::Io {
            path: self.reports_dir.clone(),
            source,
        })?;

        let css = self.reports_dir.join(STYLESHEET);
        std::fs::write(&css, STYLE_CSS).map_err(|source| ReportError::Io { path: css, source })?;

        let path = self.next_report_path(&now);
        std::fs::write(&path, data.to_html()).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;

        emit_report_written(&path, &data.counts);
        Ok(path)
    }

    fn next_report_path(&self, now: &DateTime<Local>) -> PathBuf {
        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let first = self.reports_dir.join(format!("report_{stamp}.html"));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.reports_dir.join(format!("report_{stamp}-{n}.html")))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }

    /// Most recently modified `report_*.html`.
    pub fn latest_report(&self) -> Option<PathBuf> {
        std::fs::read_dir(&self.reports_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("report_") && name.ends_with(".html")
            })
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, path)| path)
    }

    /// Link a coverage merge report from the latest run report.
    pub fn append_merge_link(
        &self,
        output_db: &str,
        now: DateTime<Local>,
    ) -> Result<PathBuf, ReportError> {
        let report = self
            .latest_report()
            .ok_or_else(|| ReportError::NoReport(self.reports_dir.clone()))?;

        let html = std::fs::read_to_string(&report).map_err(|source| ReportError::Io {
            path: report.clone(),
            source,
        })?;

        let link = format!(
            "<h3><a href=\"{}.html\">Coverage Merge Report on {}</a></h3>\n",
            escape_html(output_db),
            now.format("%d-%m-%Y %H:%M")
        );
        let updated = match html.rfind("</body>") {
            Some(idx) => format!("{}{link}{}", &html[..idx], &html[idx..]),
            None => {
                warn!(report = %report.display(), "report has no </body>, appending link at end");
                format!("{html}{link}")
            }
        };

        std::fs::write(&report, updated).map_err(|source| ReportError::Io {
            path: report.clone(),
            source,
        })?;
        info!(report = %report.display(), output_db = %output_db, "merge report linked");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use river_plugin::TestListEntry;

    fn spec() -> RunSpec {
        RunSpec {
            isa: "rv64imac".to_string(),
            work_dir: PathBuf::from("/w"),
            generators: vec!["aapg".to_string()],
            duts: vec!["chromite".to_string()],
            references: vec!["spike".to_string()],
            config_digest: "ab".repeat(32),
        }
    }

    fn results() -> TestList {
        let mut list = TestList::new();
        list.insert("t1", TestListEntry::new("/w/t1"));
        list.insert("t<2>", TestListEntry::new("/w/t2"));
        list.set_result("t1", TestResult::Passed);
        list
    }

    fn at(sec: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, sec).unwrap()
    }

    #[test]
    fn test_counts_come_from_results_not_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("dut.json");
        std::fs::write(
            &log,
            "{\"$report_type\":\"TestReport\",\"nodeid\":\"a\",\"outcome\":\"failed\"}\n\
             {\"$report_type\":\"TestReport\",\"nodeid\":\"b\",\"outcome\":\"failed\"}\n",
        )
        .unwrap();
        let logs = LogSources {
            dut: vec![log],
            ..Default::default()
        };

        let data = ReportData::new(&spec(), &results(), &logs, at(0));
        assert_eq!(data.dut_logs.len(), 2);
        assert_eq!(data.counts.total, 2);
        assert_eq!(data.counts.passed, 1);
        assert_eq!(data.counts.failed, 0);
        assert_eq!(data.counts.unavailable, 1);
    }

    #[test]
    fn test_html_is_escaped() {
        let data = ReportData::new(&spec(), &results(), &LogSources::default(), at(0));
        let html = data.to_html();
        assert!(html.contains("t&lt;2&gt;"));
        assert!(!html.contains("t<2>"));
        assert!(html.contains("rv64imac"));
        assert!(html.contains("09-03-2024"));
    }

    #[test]
    fn test_build_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let agg = ReportAggregator::new(dir.path());

        let first = agg.build_at(at(7), &spec(), &results(), &LogSources::default()).unwrap();
        let second = agg.build_at(at(7), &spec(), &results(), &LogSources::default()).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.file_name().unwrap(), "report_20240309-140507.html");
        assert_eq!(second.file_name().unwrap(), "report_20240309-140507-1.html");
        assert!(dir.path().join("reports/style.css").is_file());
    }

    #[test]
    fn test_merge_link_goes_into_latest_report() {
        let dir = tempfile::tempdir().unwrap();
        let agg = ReportAggregator::new(dir.path());
        assert!(matches!(
            agg.append_merge_link("merged", at(0)),
            Err(ReportError::NoReport(_))
        ));

        agg.build_at(at(1), &spec(), &results(), &LogSources::default()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newest = agg.build_at(at(2), &spec(), &results(), &LogSources::default()).unwrap();

        let linked = agg.append_merge_link("merged", at(3)).unwrap();
        assert_eq!(linked, newest);
        let html = std::fs::read_to_string(&linked).unwrap();
        let link = html.find("<a href=\"merged.html\">Coverage Merge Report on").unwrap();
        assert!(link < html.find("</body>").unwrap());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a&b<c>\"'"), "a&amp;b&lt;c&gt;&quot;&#39;");
    }
}
