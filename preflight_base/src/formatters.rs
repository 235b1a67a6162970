//! Result formatters
//!
//! Render a `ResultSet` as JSON, JUnit XML or plain text.

use crate::results::{CheckResult, CheckStatus, ResultSet, ResultSummary};
use serde::Serialize;

pub const DEFAULT_FORMAT: &str = "json";
pub const AVAILABLE_FORMATS: [&str; 3] = ["json", "junitxml", "text"];

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unknown format '{0}', expected one of json, junitxml, text")]
    UnknownFormat(String),

    #[error("failed to encode results: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait Formatter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extension used for the results file, without the dot
    fn file_extension(&self) -> &'static str;

    fn format(&self, results: &ResultSet) -> Result<Vec<u8>, FormatError>;
}

/// Look up a formatter by name
pub fn new_by_name(name: &str) -> Result<Box<dyn Formatter>, FormatError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "json" => Ok(Box::new(JsonFormatter::new())),
        "junitxml" | "junit" => Ok(Box::new(JunitXmlFormatter)),
        "text" => Ok(Box::new(TextFormatter)),
        _ => Err(FormatError::UnknownFormat(name.to_string())),
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    image: &'a str,
    platform: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    policy: Option<&'a str>,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<String>,
    summary: ResultSummary,
    results: JsonResults<'a>,
}

#[derive(Serialize)]
struct JsonResults<'a> {
    passed: Vec<&'a CheckResult>,
    failed: Vec<&'a CheckResult>,
    errors: Vec<&'a CheckResult>,
}

/// Results grouped into passed, failed and errors
#[derive(Debug, Clone, Copy)]
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for JsonFormatter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn format(&self, results: &ResultSet) -> Result<Vec<u8>, FormatError> {
        let report = JsonReport {
            image: &results.image,
            platform: &results.platform,
            policy: results.policy.as_ref().map(|p| p.as_str()),
            passed: results.passed(),
            started_at: results.started_at.map(|t| t.to_rfc3339()),
            finished_at: results.finished_at.map(|t| t.to_rfc3339()),
            summary: results.summary(),
            results: JsonResults {
                passed: results.passed_results().collect(),
                failed: results.failed_results().collect(),
                errors: results.errored_results().collect(),
            },
        };

        let mut out = if self.pretty {
            serde_json::to_vec_pretty(&report)?
        } else {
            serde_json::to_vec(&report)?
        };
        out.push(b'\n');
        Ok(out)
    }
}

/// One JUnit test suite per result set, named after the policy
#[derive(Debug, Clone, Copy, Default)]
pub struct JunitXmlFormatter;

fn escape_xml(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            c => result.push(c),
        }
    }
    result
}

impl Formatter for JunitXmlFormatter {
    fn name(&self) -> &'static str {
        "junitxml"
    }

    fn file_extension(&self) -> &'static str {
        "xml"
    }

    fn format(&self, results: &ResultSet) -> Result<Vec<u8>, FormatError> {
        let summary = results.summary();
        let suite = results.policy.map(|p| p.as_str()).unwrap_or("preflight");
        let total_secs: f64 = results
            .results
            .iter()
            .map(|r| r.elapsed.as_secs_f64())
            .sum();

        let mut output = String::new();
        output.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        output.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">\n",
            summary.total, summary.failed, summary.errored, total_secs
        ));
        output.push_str(&format!(
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">\n",
            escape_xml(suite),
            summary.total,
            summary.failed,
            summary.errored,
            total_secs
        ));
        output.push_str("    <properties>\n");
        for (name, value) in [("image", &results.image), ("platform", &results.platform)] {
            output.push_str(&format!(
                "      <property name=\"{}\" value=\"{}\" />\n",
                name,
                escape_xml(value)
            ));
        }
        output.push_str("    </properties>\n");

        for result in &results.results {
            output.push_str(&format!(
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
                escape_xml(&result.name),
                escape_xml(&results.image),
                result.elapsed.as_secs_f64()
            ));

            match &result.status {
                CheckStatus::Passed => output.push_str(" />\n"),
                CheckStatus::Failed => {
                    output.push_str(">\n");
                    output.push_str(&format!(
                        "      <failure message=\"{}\" type=\"\">{}</failure>\n",
                        escape_xml(&result.help.message),
                        escape_xml(&result.help.suggestion)
                    ));
                    output.push_str("    </testcase>\n");
                }
                CheckStatus::Errored { reason, detail } => {
                    output.push_str(">\n");
                    output.push_str(&format!(
                        "      <error message=\"{}\" type=\"{}\" />\n",
                        escape_xml(detail),
                        reason.as_str()
                    ));
                    output.push_str("    </testcase>\n");
                }
            }
        }

        output.push_str("  </testsuite>\n");
        output.push_str("</testsuites>\n");
        Ok(output.into_bytes())
    }
}

/// Human readable summary
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn name(&self) -> &'static str {
        "text"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn format(&self, results: &ResultSet) -> Result<Vec<u8>, FormatError> {
        let mut output = String::new();
        output.push_str(&format!(
            "Image: {}\nPlatform: {}\n",
            results.image, results.platform
        ));
        if let Some(policy) = results.policy {
            output.push_str(&format!("Policy: {policy}\n"));
        }
        output.push('\n');

        for result in &results.results {
            output.push_str(&format!("{:<8} {}", result.status.label(), result.name));
            if !result.is_required() {
                output.push_str(" (optional)");
            }
            output.push('\n');

            match &result.status {
                CheckStatus::Passed => {}
                CheckStatus::Failed => {
                    if !result.help.message.is_empty() {
                        output.push_str(&format!("         {}\n", result.help.message));
                    }
                    if !result.help.suggestion.is_empty() {
                        output.push_str(&format!("         Suggestion: {}\n", result.help.suggestion));
                    }
                }
                CheckStatus::Errored { detail, .. } => {
                    output.push_str(&format!("         Error: {detail}\n"));
                }
            }
        }

        let summary = results.summary();
        output.push_str(&format!(
            "\n{} checks: {} passed, {} failed, {} errored\nResult: {}\n",
            summary.total,
            summary.passed,
            summary.failed,
            summary.errored,
            if results.passed() { "PASSED" } else { "FAILED" }
        ));
        Ok(output.into_bytes())
    }
}
