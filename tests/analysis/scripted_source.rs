//! Scripted job source and shared helpers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use ci_triage_lib::db::DbPool;
use ci_triage_lib::error::{AppError, AppResult};
use ci_triage_lib::models::job::JobLinks;
use ci_triage_lib::models::{JobDetails, JobId, JobSummary, TestCaseResult, TestGroupResult};
use ci_triage_lib::services::{JobCache, JobQuery, JobSource};

pub const VERSION: &str = "4.2";
pub const FLAVOR: &str = "pull-requests";
pub const MACHINE: &str = "64bit";

/// Remote calls seen by a [`ScriptedSource`].
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    pub summaries: Vec<JobId>,
    pub details: Vec<JobId>,
    pub listings: Vec<JobQuery>,
    pub logs: Vec<(JobId, String)>,
}

impl CallLog {
    pub fn details_of(&self, job_id: JobId) -> usize {
        self.details.iter().filter(|id| **id == job_id).count()
    }

    pub fn summaries_of(&self, job_id: JobId) -> usize {
        self.summaries.iter().filter(|id| **id == job_id).count()
    }
}

/// In-process job source serving a fixed set of jobs.
#[derive(Default)]
pub struct ScriptedSource {
    jobs: BTreeMap<JobId, (JobSummary, JobDetails)>,
    logs: HashMap<(JobId, String), String>,
    calls: Mutex<CallLog>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. A parent must be added before its children.
    pub fn add(&mut self, spec: JobSpec) -> &mut Self {
        let JobSpec {
            summary,
            details,
            logs,
        } = spec;

        for parent in &summary.parents.chained {
            if let Some((parent_summary, _)) = self.jobs.get_mut(parent) {
                parent_summary.children.chained.push(summary.id);
            }
        }
        for (name, content) in logs {
            self.logs.insert((summary.id, name), content);
        }
        self.jobs.insert(summary.id, (summary, details));
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, job_id: JobId) -> AppResult<&(JobSummary, JobDetails)> {
        self.jobs
            .get(&job_id)
            .ok_or_else(|| AppError::Transport(format!("GET /jobs/{} returned HTTP 404", job_id)))
    }

    fn matches(query: &JobQuery, summary: &JobSummary, details: &JobDetails) -> bool {
        let wanted = [
            (query.version.as_deref(), details.setting("VERSION")),
            (query.flavor.as_deref(), details.setting("FLAVOR")),
            (query.machine.as_deref(), details.setting("MACHINE")),
            (query.build.as_deref(), details.setting("BUILD")),
            (query.result.as_deref(), details.result.clone()),
        ];

        query.test.as_deref().is_none_or(|test| test == summary.test)
            && wanted
                .into_iter()
                .all(|(want, have)| want.is_none_or(|w| have.as_deref() == Some(w)))
    }
}

#[async_trait]
impl JobSource for ScriptedSource {
    async fn job_summary(&self, job_id: JobId) -> AppResult<JobSummary> {
        self.calls.lock().unwrap().summaries.push(job_id);
        Ok(self.lookup(job_id)?.0.clone())
    }

    async fn job_details(&self, job_id: JobId) -> AppResult<JobDetails> {
        self.calls.lock().unwrap().details.push(job_id);
        Ok(self.lookup(job_id)?.1.clone())
    }

    async fn list_job_ids(&self, query: &JobQuery) -> AppResult<Vec<JobId>> {
        self.calls.lock().unwrap().listings.push(query.clone());

        let mut ids: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, (summary, details))| Self::matches(query, summary, details))
            .map(|(id, _)| *id)
            .collect();

        // openQA returns the most recent jobs first when limited
        if let Some(limit) = query.limit {
            let skip = ids.len().saturating_sub(limit);
            ids.drain(..skip);
        }
        Ok(ids)
    }

    async fn job_log(&self, job_id: JobId, file_name: &str) -> AppResult<String> {
        self.calls
            .lock()
            .unwrap()
            .logs
            .push((job_id, file_name.to_string()));
        self.logs
            .get(&(job_id, file_name.to_string()))
            .cloned()
            .ok_or_else(|| AppError::Transport(format!("No log {} for job {}", file_name, job_id)))
    }
}

/// Builder for one scripted job.
pub struct JobSpec {
    summary: JobSummary,
    details: JobDetails,
    logs: Vec<(String, String)>,
}

/// A pipeline entry point, passed by default.
pub fn orphan(id: JobId, test: &str) -> JobSpec {
    let mut settings = BTreeMap::new();
    settings.insert("VERSION".to_string(), json!(VERSION));
    settings.insert("FLAVOR".to_string(), json!(FLAVOR));
    settings.insert("MACHINE".to_string(), json!(MACHINE));
    settings.insert("BUILD".to_string(), json!(format!("2024{:06}-{}", id, VERSION)));

    JobSpec {
        summary: JobSummary {
            id,
            test: test.to_string(),
            t_started: Some(format!("2024-06-01T{:02}:00:00", id % 24)),
            clone_id: None,
            parents: JobLinks::default(),
            children: JobLinks::default(),
        },
        details: JobDetails {
            result: Some("passed".to_string()),
            settings,
            ..Default::default()
        },
        logs: Vec::new(),
    }
}

/// A test-suite run chained to `parent`.
pub fn child(id: JobId, parent: JobId, test: &str) -> JobSpec {
    let mut spec = orphan(id, test);
    spec.summary.parents.chained.push(parent);
    spec
}

impl JobSpec {
    pub fn started(mut self, t_started: &str) -> Self {
        self.summary.t_started = Some(t_started.to_string());
        self
    }

    pub fn parents(mut self, parents: &[JobId]) -> Self {
        self.summary.parents.chained = parents.to_vec();
        self
    }

    pub fn cloned_as(mut self, clone_id: JobId) -> Self {
        self.summary.clone_id = Some(clone_id);
        self
    }

    pub fn result(mut self, result: &str) -> Self {
        self.details.result = Some(result.to_string());
        self
    }

    pub fn setting(mut self, key: &str, value: &str) -> Self {
        self.details.settings.insert(key.to_string(), json!(value));
        self
    }

    /// Drop a setting `orphan` filled in, as openQA omits unset ones.
    pub fn without_setting(mut self, key: &str) -> Self {
        self.details.settings.remove(key);
        self
    }

    /// Add a top-level details field the models do not cover.
    pub fn field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.extra.insert(key.to_string(), value);
        self
    }

    pub fn worker(mut self, worker_id: i64) -> Self {
        self.details.assigned_worker_id = Some(worker_id);
        self
    }

    /// Add a failed test case; marks the job and the group failed.
    pub fn failure(mut self, group: &str, title: &str, error: &str) -> Self {
        self.details.result = Some("failed".to_string());

        let position = self
            .details
            .testresults
            .iter()
            .position(|g| g.name == group)
            .unwrap_or_else(|| {
                self.details.testresults.push(TestGroupResult {
                    name: group.to_string(),
                    result: Some("failed".to_string()),
                    details: Vec::new(),
                });
                self.details.testresults.len() - 1
            });

        let entry = &mut self.details.testresults[position];
        entry.result = Some("failed".to_string());
        let num = entry.details.len() as i64 + 1;
        entry.details.push(TestCaseResult {
            result: Some("fail".to_string()),
            display_title: Some(title.to_string()),
            text_data: Some(traceback(title, error)),
            num: Some(num),
        });
        self
    }

    /// Add a test group that never reported a result.
    pub fn inconclusive_group(mut self, group: &str) -> Self {
        self.details.testresults.push(TestGroupResult {
            name: group.to_string(),
            result: Some("none".to_string()),
            details: Vec::new(),
        });
        self
    }

    pub fn log(mut self, name: &str, content: &str) -> Self {
        self.details.ulogs.push(name.to_string());
        self.logs.push((name.to_string(), content.to_string()));
        self
    }
}

/// Test description in the shape the test harness uploads.
pub fn traceback(title: &str, error: &str) -> String {
    format!(
        "# Result:\n# error: {}\nTraceback (most recent call last):\n  File \"/usr/lib/python3/qubes/tests/basic.py\", line 42, in {}\n    self.assertTrue(ok)\n{}\n# system-out:\n",
        title, title, error
    )
}

/// Fresh cache over an in-memory database.
pub async fn create_test_cache(source: ScriptedSource) -> JobCache<ScriptedSource> {
    let db = DbPool::in_memory()
        .await
        .expect("Failed to open in-memory cache");
    JobCache::new(db, source)
}
