//! Instability analysis over historical runs of the same test suite.
//!
//! Samples the N most recent valid runs that precede a reference job and
//! share its `(test, version, flavor, machine)` key, then flags every test
//! that either failed only in some of them or failed in all of them with
//! differing errors.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{FailureSignature, Job, JobId, TestFailure, TestIdentity, TestKey};
use crate::services::diff::ResultsDiff;
use crate::services::job_cache::JobCache;
use crate::services::job_source::{JobQuery, JobSource};

/// Results of jobs that count as concluded runs.
const CONCLUDED_RESULTS: [&str; 2] = ["passed", "failed"];

/// Why a test is considered unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstabilityReason {
    /// Failed in some samples and passed in others.
    Intermittent,
    /// Failed in every sample, but not always with the same error.
    InconsistentError,
}

/// A test flagged as unstable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnstableTest {
    #[serde(flatten)]
    pub identity: TestIdentity,
    pub reason: InstabilityReason,
    /// Number of sampled jobs the test failed in
    pub failed_in: usize,
    pub sampled: usize,
    /// Distinct relevant errors seen across the samples
    pub errors: Vec<String>,
    /// Whether the reference job fails this test too
    pub currently_failing: bool,
}

impl UnstableTest {
    pub fn signature(&self) -> FailureSignature {
        let title = (!self.identity.title.is_empty()).then_some(self.identity.title.as_str());
        FailureSignature::of(&self.identity.name, title, self.identity.test_id)
    }
}

/// Outcome of analysing a reference job.
#[derive(Debug, Clone, Serialize)]
pub struct InstabilityReport {
    pub reference_job: JobId,
    pub test_key: TestKey,
    pub requested_samples: usize,
    pub sampled_jobs: Vec<JobId>,
    pub unstable: Vec<UnstableTest>,
}

impl InstabilityReport {
    pub fn is_unstable(&self, failure: &TestFailure) -> bool {
        let signature = failure.signature();
        self.unstable.iter().any(|u| u.signature() == signature)
    }
}

/// Flag the entries of one suite that `report` found unstable.
pub fn suppress_unstable(diff: &mut ResultsDiff, suite: &str, report: &InstabilityReport) {
    if let Some(entries) = diff.results.get_mut(suite) {
        for entry in entries.iter_mut() {
            if report.is_unstable(&entry.failure) {
                entry.unstable = true;
            }
        }
    }
}

/// Samples history and classifies test stability.
#[derive(Debug, Clone, Copy)]
pub struct InstabilityAnalyzer {
    sample_size: usize,
}

impl InstabilityAnalyzer {
    pub fn new(sample_size: usize) -> Self {
        InstabilityAnalyzer {
            sample_size: sample_size.max(1),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Analyse the history of a child job.
    pub async fn analyze<S: JobSource>(
        &self,
        cache: &mut JobCache<S>,
        reference_id: JobId,
    ) -> AppResult<InstabilityReport> {
        let reference = cache.get_job(reference_id).await?;
        if reference.is_orphan() {
            return Err(AppError::InvalidInput(format!(
                "Instability analysis needs a test-suite job, {} ({}) has no parent",
                reference.job_id, reference.job_name
            )));
        }

        let sampled = self.sample_jobs_like(cache, &reference).await?;
        let sampled_ids: Vec<JobId> = sampled.iter().map(|job| job.job_id).collect();
        let failures = cache.db().get_failures_for_jobs(&sampled_ids).await?;

        let current: HashSet<FailureSignature> = cache
            .results(reference_id)
            .await?
            .values()
            .flatten()
            .map(TestFailure::signature)
            .collect();

        let mut unstable = classify_instability(&sampled_ids, &failures);
        for test in &mut unstable {
            test.currently_failing = current.contains(&test.signature());
        }

        info!(
            "Job {}: {} unstable tests across {} sampled runs",
            reference_id,
            unstable.len(),
            sampled_ids.len()
        );

        Ok(InstabilityReport {
            reference_job: reference_id,
            test_key: reference.test_key(),
            requested_samples: self.sample_size,
            sampled_jobs: sampled_ids,
            unstable,
        })
    }

    /// The most recent valid concluded jobs sharing the reference's test key
    /// and preceding it, newest first.
    pub async fn sample_jobs_like<S: JobSource>(
        &self,
        cache: &mut JobCache<S>,
        reference: &Job,
    ) -> AppResult<Vec<Job>> {
        let key = reference.test_key();
        // An unset key field would match nothing as an empty filter
        let base = JobQuery {
            test: non_empty(&key.test),
            version: non_empty(&key.version),
            flavor: non_empty(&key.flavor),
            machine: non_empty(&key.machine),
            ..Default::default()
        };

        // Newest concluded job; running or incomplete jobs do not widen the window
        let mut latest = reference.job_id;
        for result in CONCLUDED_RESULTS {
            let query = base.clone().with_result(result).with_limit(1);
            if let Some(&newest) = cache.source().list_job_ids(&query).await?.last() {
                latest = latest.max(newest);
            }
        }

        // Pad the window to absorb invalid and excluded jobs
        let window = usize::try_from(latest.saturating_sub(reference.job_id)).unwrap_or(0)
            + 2 * self.sample_size;

        let mut concluded = Vec::new();
        for result in CONCLUDED_RESULTS {
            let query = base.clone().with_result(result).with_limit(window);
            concluded.extend(cache.source().list_job_ids(&query).await?);
        }
        concluded.sort_unstable();
        concluded.dedup();

        let anchor = match concluded.binary_search(&reference.job_id) {
            Ok(position) => position,
            Err(insertion) => {
                warn!(
                    "Job {} not among concluded {} runs, sampling from closest preceding job {:?}",
                    reference.job_id,
                    key.test,
                    insertion.checked_sub(1).map(|i| concluded[i])
                );
                insertion
            }
        };

        let mut sampled = Vec::with_capacity(self.sample_size);
        for &candidate in concluded[..anchor].iter().rev() {
            if sampled.len() == self.sample_size {
                break;
            }
            let job = cache.get_job(candidate).await?;
            if job.valid {
                sampled.push(job);
            } else {
                debug!("Skipping invalid job {} while sampling", candidate);
            }
        }

        if sampled.len() < self.sample_size {
            warn!(
                "Only {} of {} valid {} runs found before job {}",
                sampled.len(),
                self.sample_size,
                key.test,
                reference.job_id
            );
        }

        Ok(sampled)
    }
}

fn non_empty(value: &str) -> Option<String> {
    Some(value).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Classify every test that failed in at least one sampled job.
///
/// `failures` must only contain failures of `sampled_jobs`. Tests that never
/// failed have no rows and are stable by construction.
pub fn classify_instability(sampled_jobs: &[JobId], failures: &[TestFailure]) -> Vec<UnstableTest> {
    let sampled = sampled_jobs.iter().collect::<HashSet<_>>().len();

    let mut by_identity: BTreeMap<TestIdentity, Vec<&TestFailure>> = BTreeMap::new();
    for failure in failures {
        by_identity.entry(failure.identity()).or_default().push(failure);
    }

    let mut unstable = Vec::new();
    for (identity, rows) in by_identity {
        let failed_in = rows.iter().map(|f| f.job_id).collect::<HashSet<_>>().len();
        let errors: BTreeSet<String> = rows
            .iter()
            .map(|f| f.relevant_error.clone().unwrap_or_default())
            .collect();

        let reason = if failed_in < sampled {
            InstabilityReason::Intermittent
        } else if errors.len() > 1 {
            InstabilityReason::InconsistentError
        } else {
            continue;
        };

        unstable.push(UnstableTest {
            identity,
            reason,
            failed_in,
            sampled,
            errors: errors.into_iter().collect(),
            currently_failing: false,
        });
    }

    unstable
}
