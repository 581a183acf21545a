//! Test failure domain models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::test_failure;

/// Results of a job: test-suite name -> ordered failures.
pub type JobResults = BTreeMap<String, Vec<TestFailure>>;

/// Name of the aggregate wrapper test that only counts when it timed out.
pub const SYSTEM_TESTS_NAME: &str = "system_tests";

/// Why a test case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    Error,
    Failure,
    Skipped,
    Unknown,
    TestDied,
    WaitSerial,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Unknown => "unknown",
            Self::TestDied => "test died",
            Self::WaitSerial => "wait serial expected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "failure" => Some(Self::Failure),
            "skipped" => Some(Self::Skipped),
            "unknown" => Some(Self::Unknown),
            "test died" => Some(Self::TestDied),
            "wait serial expected" => Some(Self::WaitSerial),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single failed test case of a job.
///
/// Storage identity is `(job_id, name, title, test_id)`; use
/// [`TestFailure::signature`] to compare failures across jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub job_id: i64,
    /// Test group (openQA test module)
    pub name: String,
    /// Test case title, if openQA reported one
    pub title: Option<String>,
    /// Ordinal of the case within its group
    pub test_id: i64,
    pub fail_reason: FailReason,
    /// Short one-line summary of the error
    pub relevant_error: Option<String>,
    pub fail_error: Option<String>,
    pub cleanup_error: Option<String>,
    pub timed_out: bool,
    pub has_description: bool,
    /// Target OS template inferred from the test name
    pub template: String,
}

impl TestFailure {
    /// Whether this failure should be reported at all.
    ///
    /// The `system_tests` wrapper fails for environment reasons too; it only
    /// counts when it timed out.
    pub fn is_valid(&self) -> bool {
        if self.name != SYSTEM_TESTS_NAME {
            return true;
        }
        self.timed_out
    }

    /// Identity used when comparing failures of different jobs.
    pub fn signature(&self) -> FailureSignature {
        FailureSignature::of(&self.name, self.title.as_deref(), self.test_id)
    }

    /// Storage identity `(name, title, test_id)`, ignoring the job.
    pub fn identity(&self) -> TestIdentity {
        TestIdentity {
            name: self.name.clone(),
            title: self.title.clone().unwrap_or_default(),
            test_id: self.test_id,
        }
    }

    /// Build from a cached row.
    pub fn from_model(model: test_failure::Model) -> Self {
        let fail_reason = FailReason::parse(&model.fail_reason).unwrap_or(FailReason::Unknown);
        TestFailure {
            job_id: model.job_id,
            name: model.name,
            title: if model.title.is_empty() {
                None
            } else {
                Some(model.title)
            },
            test_id: model.test_id,
            fail_reason,
            relevant_error: model.relevant_error,
            fail_error: model.fail_error,
            cleanup_error: model.cleanup_error,
            timed_out: model.timed_out,
            has_description: model.has_description,
            template: model.template,
        }
    }
}

/// Cross-job identity of a failure.
///
/// Titled tests match on `(name, title)`; untitled ones fall back to
/// `(name, test_id)`. The job id never participates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FailureSignature {
    pub name: String,
    pub key: SignatureKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKey {
    Title(String),
    TestId(i64),
}

impl FailureSignature {
    pub fn of(name: &str, title: Option<&str>, test_id: i64) -> Self {
        let key = match title {
            Some(title) if !title.is_empty() => SignatureKey::Title(title.to_string()),
            _ => SignatureKey::TestId(test_id),
        };
        FailureSignature {
            name: name.to_string(),
            key,
        }
    }
}

/// Storage identity of a test case across jobs, as grouped by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TestIdentity {
    pub name: String,
    /// Empty when untitled
    pub title: String,
    pub test_id: i64,
}
