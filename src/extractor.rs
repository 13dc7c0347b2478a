use crate::models::AnalysisArtifacts;
use once_cell::sync::Lazy;
use regex::Regex;

static ANSI_ESCAPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").expect("valid ansi escape regex")
});

const REPORT_LABEL: &str = "Full report: ";
const WORK_DIR_LABEL: &str = "Analysis Directory: ";

pub fn strip_ansi(input: &str) -> String {
    ANSI_ESCAPE_RE.replace_all(input, "").to_string()
}

/// Value of the first occurrence of a labeled line: the remainder of the
/// line after the label, styling stripped, whitespace trimmed. `None`
/// when the value ends up empty.
fn labeled_value(output: &str, label: &str) -> Option<String> {
    let start = output.find(label)? + label.len();
    let rest = &output[start..];
    let line = rest.split('\n').next().unwrap_or_default();
    let value = strip_ansi(line).trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Pulls the report path and working directory out of a terminal run's
/// full output. A missing label is an absent field, never an error; a
/// successful run without a parseable report path is still a success.
pub fn extract_artifacts(output: &str) -> AnalysisArtifacts {
    AnalysisArtifacts {
        report_path: labeled_value(output, REPORT_LABEL),
        work_directory: labeled_value(output, WORK_DIR_LABEL),
    }
}
