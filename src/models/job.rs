//! Job domain models and openQA payloads.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::entity::job;
use crate::error::{AppError, AppResult};

/// openQA job id. Ids grow monotonically and stand in for time ordering.
pub type JobId = i64;

// ============================================================================
// openQA API payloads
// ============================================================================

/// Envelope used by `/jobs/{id}` and `/jobs/{id}/details`.
#[derive(Debug, Deserialize)]
pub struct JobEnvelope<T> {
    pub job: T,
}

/// Envelope used by the `/jobs` listing.
#[derive(Debug, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub jobs: Vec<JobListEntry>,
}

#[derive(Debug, Deserialize)]
pub struct JobListEntry {
    pub id: JobId,
}

/// Dependency links of a job. Only chained dependencies are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobLinks {
    #[serde(rename = "Chained", default)]
    pub chained: Vec<JobId>,
}

/// Summary returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    /// Test-suite name
    pub test: String,
    #[serde(default)]
    pub t_started: Option<String>,
    #[serde(default)]
    pub clone_id: Option<JobId>,
    #[serde(default)]
    pub parents: JobLinks,
    #[serde(default)]
    pub children: JobLinks,
}

impl JobSummary {
    /// Chained parent of the job, if any.
    ///
    /// The job model only supports single-parent chaining.
    pub fn parent_id(&self) -> AppResult<Option<JobId>> {
        match self.parents.chained.as_slice() {
            [] => Ok(None),
            [parent] => Ok(Some(*parent)),
            parents => Err(AppError::ModelViolation(format!(
                "Job {} has {} chained parents, only one is supported",
                self.id,
                parents.len()
            ))),
        }
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.t_started.as_deref().and_then(parse_openqa_time)
    }
}

/// Payload of `GET /jobs/{id}/details`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDetails {
    /// Overall result: passed, failed, incomplete, ...
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub testresults: Vec<TestGroupResult>,
    /// Uploaded log file names
    #[serde(default)]
    pub ulogs: Vec<String>,
    #[serde(default)]
    pub assigned_worker_id: Option<i64>,
    /// Remaining payload fields, kept so the cached blob matches what openQA sent
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl JobDetails {
    /// String value of a job setting.
    pub fn setting(&self, key: &str) -> Option<String> {
        match self.settings.get(key)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// One test group (openQA test module) of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGroupResult {
    pub name: String,
    /// passed, failed, softfailed, none, ...
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub details: Vec<TestCaseResult>,
}

/// One test case entry of a test group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    /// ok, fail, unk, softfail
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub text_data: Option<String>,
    #[serde(default)]
    pub num: Option<i64>,
}

/// Parse an openQA timestamp (`2024-05-01T10:02:03`, naive UTC).
pub fn parse_openqa_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

// ============================================================================
// Domain job
// ============================================================================

/// Position of a job in the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Entry point of a build pipeline (e.g. installing updates).
    Orphan,
    /// A test-suite run chained off a single parent.
    Child { parent_id: JobId },
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orphan => "orphan",
            Self::Child { .. } => "child",
        }
    }
}

/// Key that makes historical runs comparable with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TestKey {
    pub test: String,
    pub version: String,
    pub flavor: String,
    pub machine: String,
}

/// A concluded openQA job as held by the cache.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobKind,
    pub job_name: String,
    pub version: String,
    pub flavor: String,
    pub machine: String,
    pub build: String,
    pub worker_id: Option<i64>,
    pub clone_id: Option<JobId>,
    pub result: String,
    pub t_started: Option<String>,
    pub valid: bool,
    #[serde(skip)]
    pub details: JobDetails,
}

impl Job {
    /// Assemble a job from freshly fetched remote data.
    pub fn from_remote(summary: &JobSummary, details: JobDetails, valid: bool) -> AppResult<Self> {
        let kind = match summary.parent_id()? {
            None => JobKind::Orphan,
            Some(parent_id) => JobKind::Child { parent_id },
        };

        Ok(Job {
            job_id: summary.id,
            kind,
            job_name: summary.test.clone(),
            version: details.setting("VERSION").unwrap_or_default(),
            flavor: details.setting("FLAVOR").unwrap_or_default(),
            machine: details.setting("MACHINE").unwrap_or_default(),
            build: details.setting("BUILD").unwrap_or_default(),
            worker_id: details.assigned_worker_id,
            clone_id: summary.clone_id,
            result: details.result.clone().unwrap_or_else(|| "none".to_string()),
            t_started: summary.t_started.clone(),
            valid,
            details,
        })
    }

    /// Rebuild a job from its cached row.
    pub fn from_model(model: job::Model) -> AppResult<Self> {
        let kind = match (model.kind.as_str(), model.parent_id) {
            ("orphan", None) => JobKind::Orphan,
            ("child", Some(parent_id)) => JobKind::Child { parent_id },
            (kind, parent) => {
                return Err(AppError::Database(format!(
                    "Cached job {} has inconsistent kind '{}' (parent {:?})",
                    model.job_id, kind, parent
                )));
            }
        };

        let details: JobDetails = serde_json::from_str(&model.details).map_err(|e| {
            AppError::Database(format!(
                "Cached details of job {} are corrupt: {}",
                model.job_id, e
            ))
        })?;

        Ok(Job {
            job_id: model.job_id,
            kind,
            job_name: model.job_name,
            version: model.version,
            flavor: model.flavor,
            machine: model.machine,
            build: model.build,
            worker_id: model.worker_id,
            clone_id: model.clone_id,
            result: model.result,
            t_started: model.t_started,
            valid: model.valid,
            details,
        })
    }

    pub fn parent_id(&self) -> Option<JobId> {
        match self.kind {
            JobKind::Orphan => None,
            JobKind::Child { parent_id } => Some(parent_id),
        }
    }

    pub fn is_orphan(&self) -> bool {
        matches!(self.kind, JobKind::Orphan)
    }

    pub fn test_key(&self) -> TestKey {
        TestKey {
            test: self.job_name.clone(),
            version: self.version.clone(),
            flavor: self.flavor.clone(),
            machine: self.machine.clone(),
        }
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        let raw = self.t_started.as_deref()?;
        let parsed = parse_openqa_time(raw);
        if parsed.is_none() {
            warn!("Job {} has unparseable start time '{}'", self.job_id, raw);
        }
        parsed
    }

    /// Pull requests the build was made from (`PULL_REQUESTS` setting).
    pub fn pull_requests(&self) -> Vec<String> {
        self.details
            .setting("PULL_REQUESTS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Decide whether a concluded job may serve as a statistical sample.
///
/// Cloned jobs were superseded by a restart. Passed jobs are valid; failed
/// jobs only when every test group concluded and at least one actionable
/// failure was recorded. Any other result is invalid.
pub fn assess_validity(
    clone_id: Option<JobId>,
    details: &JobDetails,
    actionable_failures: usize,
) -> bool {
    if clone_id.is_some() {
        return false;
    }

    match details.result.as_deref() {
        Some("passed") => true,
        Some("failed") => {
            let all_groups_ran = details
                .testresults
                .iter()
                .all(|group| group.result.as_deref().unwrap_or("none") != "none");
            all_groups_ran && actionable_failures > 0
        }
        _ => false,
    }
}
