//! Read access to the openQA job API.
//!
//! Every call is one blocking round-trip from the analysis' point of view:
//! no retries, no fan-out. Failures surface as fatal `Transport` or
//! `InvalidResponse` errors.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::job::{JobEnvelope, JobListing};
use crate::models::{JobDetails, JobId, JobSummary};

/// Filters of the `/jobs` listing. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub test: Option<String>,
    pub build: Option<String>,
    pub version: Option<String>,
    pub flavor: Option<String>,
    pub machine: Option<String>,
    pub result: Option<String>,
    pub limit: Option<usize>,
}

impl JobQuery {
    pub fn for_test(test: &str) -> Self {
        JobQuery {
            test: Some(test.to_string()),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Some(result.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Encode as a query string (including the leading `?`), or empty.
    pub fn to_query_string(&self) -> String {
        let limit = self.limit.map(|l| l.to_string());
        let params: Vec<String> = [
            ("test", self.test.as_deref()),
            ("build", self.build.as_deref()),
            ("version", self.version.as_deref()),
            ("flavor", self.flavor.as_deref()),
            ("machine", self.machine.as_deref()),
            ("result", self.result.as_deref()),
            ("limit", limit.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, urlencoding::encode(v))))
        .collect();

        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// Source of concluded job records.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// `GET /jobs/{id}`: name, start time, dependency links, clone id.
    async fn job_summary(&self, job_id: JobId) -> AppResult<JobSummary>;

    /// `GET /jobs/{id}/details`: settings, result and per-test results.
    async fn job_details(&self, job_id: JobId) -> AppResult<JobDetails>;

    /// `GET /jobs?...`: matching job ids, sorted ascending.
    async fn list_job_ids(&self, query: &JobQuery) -> AppResult<Vec<JobId>>;

    /// Text of a log file uploaded by the job.
    async fn job_log(&self, job_id: JobId, file_name: &str) -> AppResult<String>;
}

/// HTTP client for an openQA instance.
#[derive(Clone)]
pub struct OpenQaClient {
    base_url: String,
    api_url: String,
    http_client: reqwest::Client,
}

impl OpenQaClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("ci-triage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.openqa_url.clone(),
            api_url: config.api_url(),
            http_client,
        })
    }

    async fn get(&self, url: &str) -> AppResult<reqwest::Response> {
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "GET {} returned HTTP {}",
                url, status
            )));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let body = self.get(url).await?.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::InvalidResponse(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl JobSource for OpenQaClient {
    async fn job_summary(&self, job_id: JobId) -> AppResult<JobSummary> {
        let url = format!("{}/jobs/{}", self.api_url, job_id);
        let envelope: JobEnvelope<JobSummary> = self.get_json(&url).await?;
        Ok(envelope.job)
    }

    async fn job_details(&self, job_id: JobId) -> AppResult<JobDetails> {
        let url = format!("{}/jobs/{}/details", self.api_url, job_id);
        let envelope: JobEnvelope<JobDetails> = self.get_json(&url).await?;
        Ok(envelope.job)
    }

    async fn list_job_ids(&self, query: &JobQuery) -> AppResult<Vec<JobId>> {
        let url = format!("{}/jobs{}", self.api_url, query.to_query_string());
        let listing: JobListing = self.get_json(&url).await?;

        let mut ids: Vec<JobId> = listing.jobs.into_iter().map(|job| job.id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn job_log(&self, job_id: JobId, file_name: &str) -> AppResult<String> {
        let url = format!(
            "{}/tests/{}/file/{}",
            self.base_url,
            job_id,
            urlencoding::encode(file_name)
        );
        Ok(self.get(&url).await?.text().await?)
    }
}
