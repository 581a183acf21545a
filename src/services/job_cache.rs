//! Job cache and job tree model.
//!
//! All access to the remote job source goes through [`JobCache`]. A job is
//! fetched at most once: concluded jobs never change, so every job and each
//! of its failures is written to the durable cache as soon as it is built
//! and served from there afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{
    Job, JobDetails, JobId, JobResults, JobSummary, TestFailure, assess_validity,
};
use crate::services::classifier::{RawFailure, classify};
use crate::services::job_source::JobSource;

/// Cache of concluded jobs, backed by SQLite and an in-process arena.
pub struct JobCache<S> {
    source: S,
    db: DbPool,
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, JobResults>,
}

impl<S: JobSource> JobCache<S> {
    pub fn new(db: DbPool, source: S) -> Self {
        JobCache {
            source,
            db,
            jobs: HashMap::new(),
            results: HashMap::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Get a job, fetching it (and any missing ancestors) on first use.
    pub async fn get_job(&mut self, job_id: JobId) -> AppResult<Job> {
        self.ensure(job_id).await?;
        self.cached(job_id).cloned()
    }

    /// Make sure `job_id` and its whole parent chain are cached.
    ///
    /// The chain is walked upwards until a cached job or an orphan is
    /// reached, then persisted top-down so a child row never precedes its
    /// parent.
    pub async fn ensure(&mut self, job_id: JobId) -> AppResult<JobId> {
        self.ensure_with_summary(job_id, None).await
    }

    /// Like [`JobCache::ensure`], reusing a summary of `job_id` the caller
    /// already fetched.
    async fn ensure_with_summary(
        &mut self,
        job_id: JobId,
        mut known: Option<JobSummary>,
    ) -> AppResult<JobId> {
        let mut pending: Vec<(Job, Vec<TestFailure>)> = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(job_id);

        while let Some(current) = next {
            if !visited.insert(current) {
                return Err(AppError::ModelViolation(format!(
                    "Job {} is its own ancestor",
                    current
                )));
            }

            if self.load_cached(current).await? {
                break;
            }

            let summary = match known.take() {
                Some(summary) => summary,
                None => self.source.job_summary(current).await?,
            };
            let (job, failures) = self.fetch_remote(summary).await?;
            next = job.parent_id();
            pending.push((job, failures));
        }

        for (job, failures) in pending.into_iter().rev() {
            self.persist(job, failures).await?;
        }

        Ok(job_id)
    }

    /// Failures of a job keyed by its test-suite name.
    pub async fn results(&mut self, job_id: JobId) -> AppResult<JobResults> {
        self.ensure(job_id).await?;
        self.results
            .get(&job_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Results of job {}", job_id)))
    }

    /// Whether the job may be used as a historical sample.
    pub async fn is_valid(&mut self, job_id: JobId) -> AppResult<bool> {
        self.ensure(job_id).await?;
        Ok(self.cached(job_id)?.valid)
    }

    /// Immediate children of a job, one per test-suite name.
    ///
    /// When a test suite was restarted under the same parent, only the most
    /// recently started run is kept.
    pub async fn children_pruned(&mut self, job_id: JobId) -> AppResult<BTreeMap<String, Job>> {
        // The child list can grow when children are restarted, so it is
        // always read fresh.
        let summary = self.source.job_summary(job_id).await?;

        let mut latest: BTreeMap<String, ChildStamp> = BTreeMap::new();
        for child_id in summary.children.chained {
            let stamp = self.child_stamp(child_id).await?;
            let superseded = latest
                .get(&stamp.name)
                .is_some_and(|previous| stamp.started <= previous.started);
            if superseded {
                debug!("Ignoring superseded run {} of {}", child_id, stamp.name);
            } else {
                latest.insert(stamp.name.clone(), stamp);
            }
        }

        let mut children = BTreeMap::new();
        for (name, stamp) in latest {
            self.ensure_with_summary(stamp.job_id, stamp.summary).await?;
            children.insert(name, self.cached(stamp.job_id)?.clone());
        }

        Ok(children)
    }

    /// Flattened results of the pruned children of a job.
    pub async fn children_results(&mut self, job_id: JobId) -> AppResult<JobResults> {
        let children = self.children_pruned(job_id).await?;

        let mut results = JobResults::new();
        for (name, child) in children {
            let mut child_results = self.results(child.job_id).await?;
            let failures = child_results.remove(&child.job_name).unwrap_or_default();
            results.insert(name, failures);
        }

        Ok(results)
    }

    /// Results to compare between builds: a pipeline entry point is judged
    /// by its children, a test-suite run by its own failures.
    pub async fn comparable_results(&mut self, job_id: JobId) -> AppResult<JobResults> {
        let job = self.get_job(job_id).await?;
        if job.is_orphan() {
            self.children_results(job_id).await
        } else {
            self.results(job_id).await
        }
    }

    fn cached(&self, job_id: JobId) -> AppResult<&Job> {
        self.jobs
            .get(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))
    }

    /// Name and start time of a child without fetching its full details.
    async fn child_stamp(&mut self, child_id: JobId) -> AppResult<ChildStamp> {
        if self.load_cached(child_id).await? {
            let child = self.cached(child_id)?;
            return Ok(ChildStamp {
                job_id: child_id,
                name: child.job_name.clone(),
                started: child.started_at(),
                summary: None,
            });
        }

        let summary = self.source.job_summary(child_id).await?;
        Ok(ChildStamp {
            job_id: child_id,
            name: summary.test.clone(),
            started: summary.started_at(),
            summary: Some(summary),
        })
    }

    /// Bring a job into the arena from the database. Returns false on a miss.
    async fn load_cached(&mut self, job_id: JobId) -> AppResult<bool> {
        if self.jobs.contains_key(&job_id) {
            debug!("Job {} served from memory", job_id);
            return Ok(true);
        }

        let Some(model) = self.db.get_job_by_id(job_id).await? else {
            return Ok(false);
        };

        let job = Job::from_model(model)?;
        let failures = self.db.get_failures_by_job_id(job_id).await?;
        debug!(
            "Job {} ({}) loaded from cache with {} failures",
            job_id,
            job.job_name,
            failures.len()
        );

        let mut results = JobResults::new();
        results.insert(job.job_name.clone(), failures);
        self.results.insert(job_id, results);
        self.jobs.insert(job_id, job);

        Ok(true)
    }

    async fn fetch_remote(&self, summary: JobSummary) -> AppResult<(Job, Vec<TestFailure>)> {
        let job_id = summary.id;
        debug!("Fetching job {} from job source", job_id);

        // Reject multi-parent jobs before paying for the details
        summary.parent_id()?;

        let details = self.source.job_details(job_id).await?;
        let failures = extract_failures(job_id, &details);
        let valid = assess_validity(summary.clone_id, &details, failures.len());
        let job = Job::from_remote(&summary, details, valid)?;

        Ok((job, failures))
    }

    async fn persist(&mut self, job: Job, failures: Vec<TestFailure>) -> AppResult<()> {
        self.db.insert_job_with_failures(&job, &failures).await?;

        info!(
            "Cached job {} ({}, {}, valid={}) with {} failures",
            job.job_id,
            job.job_name,
            job.kind.as_str(),
            job.valid,
            failures.len()
        );

        let mut results = JobResults::new();
        results.insert(job.job_name.clone(), failures);
        self.results.insert(job.job_id, results);
        self.jobs.insert(job.job_id, job);

        Ok(())
    }
}

/// A child run as seen while pruning restarts.
struct ChildStamp {
    job_id: JobId,
    name: String,
    started: Option<NaiveDateTime>,
    /// Summary fetched for an uncached child, reused when it is kept
    summary: Option<JobSummary>,
}

/// Classify the failed test cases of a job, keeping actionable ones only.
///
/// Groups that passed are skipped. A test case without an ordinal uses its
/// position in the group.
pub fn extract_failures(job_id: JobId, details: &JobDetails) -> Vec<TestFailure> {
    let mut seen = HashSet::new();
    let mut failures = Vec::new();

    for group in &details.testresults {
        if group.result.as_deref() == Some("passed") {
            continue;
        }

        for (position, case) in group.details.iter().enumerate() {
            if case.result.as_deref() != Some("fail") {
                continue;
            }

            let failure = classify(RawFailure {
                job_id,
                name: &group.name,
                title: case.display_title.as_deref(),
                description: case.text_data.as_deref(),
                test_id: case.num.unwrap_or(position as i64),
            });

            if failure.is_valid() && seen.insert(failure.identity()) {
                failures.push(failure);
            }
        }
    }

    failures
}
