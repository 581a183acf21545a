//! Failure classification for openQA test case descriptions.
//!
//! Turns the free-text `text_data` of a failed test case into a typed
//! [`TestFailure`]. JUnit-style descriptions look like:
//!
//! ```text
//! # test_003_cleanup_destroyed
//! # error:
//!
//! Traceback (most recent call last):
//!   File "dispvm.py", line 94, in test_003_cleanup_destroyed
//!     self.loop.run_until_complete(asyncio.wait_for(p.wait(), timeout))
//!   File "tasks.py", line 501, in wait_for
//!     raise exceptions.TimeoutError()
//! asyncio.exceptions.TimeoutError
//!
//! # system-out:
//! ...
//! ```
//!
//! Anything else is kept verbatim with its first line as the summary.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{FailReason, TestFailure};

/// Character budget of `relevant_error`.
pub const MAX_RELEVANT_CHARS: usize = 70;

/// Template assigned when the test name does not carry one.
pub const DEFAULT_TEMPLATE: &str = "default";

const SYSTEM_OUT_MARKER: &str = "# system-out:";
const WAIT_SERIAL_MARKER: &str = "# wait_serial expected:";
const TEST_DIED_MARKER: &str = "# Test died: ";
const ELLIPSIS: &str = "...";

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]+-\d+(-xfce)?$").expect("template pattern is valid")
});

/// Raw data of one failed test case.
#[derive(Debug, Clone, Copy)]
pub struct RawFailure<'a> {
    pub job_id: i64,
    pub name: &'a str,
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub test_id: i64,
}

/// Classify a failed test case.
pub fn classify(raw: RawFailure<'_>) -> TestFailure {
    let mut failure = TestFailure {
        job_id: raw.job_id,
        name: raw.name.to_string(),
        title: raw.title.filter(|t| !t.is_empty()).map(str::to_string),
        test_id: raw.test_id,
        fail_reason: FailReason::Unknown,
        relevant_error: None,
        fail_error: None,
        cleanup_error: None,
        timed_out: false,
        has_description: false,
        template: infer_template(raw.name),
    };

    let description = match raw.description.map(str::trim) {
        Some(d) if !d.is_empty() => d,
        _ => return failure,
    };
    failure.has_description = true;
    failure.timed_out = description.contains("timed out");

    let Some((fail_error, cleanup_error)) = description.split_once(SYSTEM_OUT_MARKER) else {
        // Non-JUnit output (test died, serial console mismatch, ...)
        if description.contains(WAIT_SERIAL_MARKER) {
            failure.fail_reason = FailReason::WaitSerial;
        }
        if description.contains(TEST_DIED_MARKER) {
            failure.fail_reason = FailReason::TestDied;
        }
        let first_line = description.lines().next().unwrap_or_default();
        failure.relevant_error = Some(truncate(first_line.trim(), MAX_RELEVANT_CHARS));
        failure.fail_error = Some(description.to_string());
        return failure;
    };

    let cleanup_error = cleanup_error.trim();
    failure.fail_error = Some(fail_error.to_string());
    failure.cleanup_error = (!cleanup_error.is_empty()).then(|| cleanup_error.to_string());

    let lines: Vec<&str> = fail_error.lines().collect();
    failure.fail_reason = reason_from_header(&lines);

    if matches!(failure.fail_reason, FailReason::Error | FailReason::Failure) {
        failure.relevant_error = Some(relevant_error(&lines, MAX_RELEVANT_CHARS));
    }

    failure
}

/// Read the JUnit status marker from the header lines.
///
/// openQA puts the test case name on the first line and the status on the
/// second; the name line is optional.
fn reason_from_header(lines: &[&str]) -> FailReason {
    for line in lines.iter().take(2) {
        if line.contains("# error:") {
            return FailReason::Error;
        }
        if line.contains("# failure:") {
            return FailReason::Failure;
        }
        if line.contains("# skipped:") {
            return FailReason::Skipped;
        }
    }
    FailReason::Unknown
}

/// Outcome of looking for the end of the last traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorBoundary<'a> {
    /// Final exception line and the indented line right before it.
    Found { previous: &'a str, line: &'a str },
    /// No indented body followed by an unindented line.
    NotFound,
}

fn is_indented(line: &str) -> bool {
    line.starts_with(char::is_whitespace)
}

/// Locate the final exception line of the last traceback in `lines`.
///
/// Trailing blank lines are ignored. Walking backwards, trailing indented
/// lines are skipped, then the unindented block; the last indented line of
/// the traceback body sits right before that block.
pub fn find_error_boundary<'a>(lines: &[&'a str]) -> ErrorBoundary<'a> {
    let end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(0, |i| i + 1);
    let lines = &lines[..end];

    let mut i = lines.len();
    while i > 0 && is_indented(lines[i - 1]) {
        i -= 1;
    }
    while i > 0 && !is_indented(lines[i - 1]) {
        i -= 1;
    }

    if i == 0 || i >= lines.len() {
        return ErrorBoundary::NotFound;
    }

    ErrorBoundary::Found {
        previous: lines[i - 1].trim(),
        line: lines[i].trim(),
    }
}

/// Summarise a traceback-style error within `max_chars` characters.
///
/// Shows the final exception line, prefixed with the line before it when
/// space allows. Without a traceback the last non-blank line is truncated.
pub fn relevant_error(lines: &[&str], max_chars: usize) -> String {
    match find_error_boundary(lines) {
        ErrorBoundary::Found { previous, line } => {
            let line_len = line.chars().count();
            if line_len + 30 < max_chars && !previous.is_empty() {
                let budget = max_chars - 4 - line_len;
                let previous: String = previous.chars().take(budget).collect();
                format!("{}... {}", previous, line)
            } else {
                truncate(line, max_chars)
            }
        }
        ErrorBoundary::NotFound => {
            let last = lines
                .iter()
                .rev()
                .map(|line| line.trim())
                .find(|line| !line.is_empty())
                .unwrap_or_default();
            truncate(last, max_chars)
        }
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Infer the target OS template from a test name such as `TC_20_gui_debian-12`.
pub fn infer_template(name: &str) -> String {
    let candidate = name.rsplit('_').next().unwrap_or(name);
    let candidate = candidate.strip_suffix("-pool").unwrap_or(candidate);

    if TEMPLATE_RE.is_match(candidate) {
        candidate.to_string()
    } else {
        DEFAULT_TEMPLATE.to_string()
    }
}
