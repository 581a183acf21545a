//! Database queries for jobs.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::warn;

use crate::entity::job::{self as job, ActiveModel, Entity as JobEntity};
use crate::error::{AppError, AppResult};
use crate::models::{Job, JobId, TestFailure};

use super::DbPool;
use super::test_failures::insert_test_failure;

impl DbPool {
    /// Insert a newly observed job and its failures atomically.
    ///
    /// Jobs are never updated afterwards, so a job row without its complete
    /// failure list must never become visible.
    pub async fn insert_job_with_failures(
        &self,
        job: &Job,
        failures: &[TestFailure],
    ) -> AppResult<job::Model> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let written = write_job(&txn, job, failures).await;
        match written {
            Ok(model) => {
                txn.commit().await.map_err(|e| {
                    AppError::Database(format!("Failed to commit job {}: {}", job.job_id, e))
                })?;
                Ok(model)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!("Failed to roll back job {}: {}", job.job_id, rollback);
                }
                Err(e)
            }
        }
    }

    /// Get a job by ID.
    pub async fn get_job_by_id(&self, job_id: JobId) -> AppResult<Option<job::Model>> {
        let result = JobEntity::find_by_id(job_id)
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get job: {}", e)))?;

        Ok(result)
    }

    /// Count cached jobs of a test suite.
    pub async fn count_jobs_by_name(&self, job_name: &str) -> AppResult<u64> {
        let count = JobEntity::find()
            .filter(job::Column::JobName.eq(job_name))
            .count(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to count jobs: {}", e)))?;

        Ok(count)
    }
}

async fn write_job<C: ConnectionTrait>(
    conn: &C,
    job: &Job,
    failures: &[TestFailure],
) -> AppResult<job::Model> {
    let model = insert_job(conn, job).await?;
    for (seq, failure) in failures.iter().enumerate() {
        insert_test_failure(conn, failure, seq as i32).await?;
    }
    Ok(model)
}

/// Insert one job row on `conn`.
pub async fn insert_job<C: ConnectionTrait>(conn: &C, job: &Job) -> AppResult<job::Model> {
    let details = serde_json::to_string(&job.details)
        .map_err(|e| AppError::Database(format!("Failed to serialize job details: {}", e)))?;

    let model = ActiveModel {
        job_id: Set(job.job_id),
        kind: Set(job.kind.as_str().to_string()),
        parent_id: Set(job.parent_id()),
        job_name: Set(job.job_name.clone()),
        version: Set(job.version.clone()),
        flavor: Set(job.flavor.clone()),
        machine: Set(job.machine.clone()),
        build: Set(job.build.clone()),
        worker_id: Set(job.worker_id),
        clone_id: Set(job.clone_id),
        result: Set(job.result.clone()),
        t_started: Set(job.t_started.clone()),
        valid: Set(job.valid),
        details: Set(details),
    };

    let result = model
        .insert(conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert job: {}", e)))?;

    Ok(result)
}
