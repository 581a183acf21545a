//! Historical failure search across recent runs of one test suite.

use std::collections::BTreeMap;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{JobId, TestFailure};
use crate::services::job_cache::JobCache;
use crate::services::job_source::{JobQuery, JobSource};

/// Label used when grouping failures whose key is missing.
pub const EMPTY_GROUP: &str = "[empty]";

/// Which failures to keep. Unset patterns match everything.
#[derive(Debug, Clone, Default)]
pub struct FailureFilter {
    pub test_name: Option<Regex>,
    pub test_title: Option<Regex>,
    /// Matched against the failure and cleanup sections
    pub error: Option<Regex>,
}

impl FailureFilter {
    /// Build a filter from a `NAME[/TITLE]` test pattern and an error pattern.
    pub fn from_patterns(test: Option<&str>, error: Option<&str>) -> AppResult<Self> {
        let (test_name, test_title) = match test {
            Some(pattern) => match pattern.split_once('/') {
                Some((name, title)) => (Some(name), Some(title)),
                None => (Some(pattern), None),
            },
            None => (None, None),
        };

        Ok(FailureFilter {
            test_name: test_name.map(compile).transpose()?,
            test_title: test_title.map(compile).transpose()?,
            error: error.map(compile).transpose()?,
        })
    }

    pub fn matches(&self, failure: &TestFailure) -> bool {
        if let Some(re) = &self.test_name
            && !re.is_match(&failure.name)
        {
            return false;
        }

        if let Some(re) = &self.test_title
            && !re.is_match(failure.title.as_deref().unwrap_or_default())
        {
            return false;
        }

        match &self.error {
            Some(re) => [&failure.fail_error, &failure.cleanup_error]
                .into_iter()
                .flatten()
                .any(|text| re.is_match(text)),
            None => true,
        }
    }
}

fn compile(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| AppError::InvalidInput(format!("Invalid pattern '{}': {}", pattern, e)))
}

/// Key for tallying failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Test,
    Template,
    Error,
    Worker,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Test => "test",
            GroupBy::Template => "template",
            GroupBy::Error => "error",
            GroupBy::Worker => "worker",
        }
    }

    fn key(&self, job: &JobFailures, failure: &TestFailure) -> String {
        let key = match self {
            GroupBy::Test => failure.title.clone(),
            GroupBy::Template => Some(failure.template.clone()),
            GroupBy::Error => failure.relevant_error.clone(),
            GroupBy::Worker => job.worker_id.map(|id| id.to_string()),
        };
        key.filter(|k| !k.is_empty())
            .unwrap_or_else(|| EMPTY_GROUP.to_string())
    }
}

impl FromStr for GroupBy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(GroupBy::Test),
            "template" => Ok(GroupBy::Template),
            "error" => Ok(GroupBy::Error),
            "worker" => Ok(GroupBy::Worker),
            other => Err(AppError::InvalidInput(format!(
                "Unknown grouping '{}', expected test, template, error or worker",
                other
            ))),
        }
    }
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Matching failures of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailures {
    pub job_id: JobId,
    pub flavor: String,
    pub worker_id: Option<i64>,
    pub t_started: Option<String>,
    pub failures: Vec<TestFailure>,
}

/// Result of an investigation.
#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    pub suite: String,
    /// Valid jobs inspected
    pub jobs_considered: usize,
    /// Jobs with at least one matching failure, oldest first
    pub jobs: Vec<JobFailures>,
}

impl Investigation {
    /// Number of matching failures per group.
    pub fn tally(&self, group_by: GroupBy) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for job in &self.jobs {
            for failure in &job.failures {
                *counts.entry(group_by.key(job, failure)).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Look at the latest `history_len` runs of `suite` and collect the
/// failures that pass `filter`.
pub async fn investigate<S: JobSource>(
    cache: &mut JobCache<S>,
    suite: &str,
    history_len: usize,
    filter: &FailureFilter,
) -> AppResult<Investigation> {
    let query = JobQuery::for_test(suite).with_limit(history_len);
    let ids = cache.source().list_job_ids(&query).await?;
    info!("Investigating {} runs of {}", ids.len(), suite);

    let mut considered = 0;
    let mut jobs = Vec::new();

    for job_id in ids {
        let job = cache.get_job(job_id).await?;
        if !job.valid || job.job_name != suite {
            debug!("Skipping job {} in investigation", job_id);
            continue;
        }

        let failures: Vec<TestFailure> = cache
            .results(job_id)
            .await?
            .into_values()
            .flatten()
            .filter(|failure| filter.matches(failure))
            .collect();

        if !failures.is_empty() {
            jobs.push(JobFailures {
                job_id,
                flavor: job.flavor,
                worker_id: job.worker_id,
                t_started: job.t_started,
                failures,
            });
        }
        considered += 1;
    }

    Ok(Investigation {
        suite: suite.to_string(),
        jobs_considered: considered,
        jobs,
    })
}
