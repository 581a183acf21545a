//! Database queries for test failures.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::test_failure::{self, ActiveModel, Entity as TestFailureEntity};
use crate::error::{AppError, AppResult};
use crate::models::{JobId, TestFailure};

use super::DbPool;

impl DbPool {
    /// Get the failures of one job, in recorded order.
    pub async fn get_failures_by_job_id(&self, job_id: JobId) -> AppResult<Vec<TestFailure>> {
        let rows = TestFailureEntity::find()
            .filter(test_failure::Column::JobId.eq(job_id))
            .order_by_asc(test_failure::Column::Seq)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get test failures: {}", e)))?;

        Ok(rows.into_iter().map(TestFailure::from_model).collect())
    }

    /// Get the failures of several jobs, grouped by job in id order.
    pub async fn get_failures_for_jobs(&self, job_ids: &[JobId]) -> AppResult<Vec<TestFailure>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = TestFailureEntity::find()
            .filter(test_failure::Column::JobId.is_in(job_ids.iter().copied()))
            .order_by_asc(test_failure::Column::JobId)
            .order_by_asc(test_failure::Column::Seq)
            .all(self.connection())
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to get test failures for jobs: {}", e))
            })?;

        Ok(rows.into_iter().map(TestFailure::from_model).collect())
    }
}

/// Insert one failure of a job at position `seq` on `conn`.
pub async fn insert_test_failure<C: ConnectionTrait>(
    conn: &C,
    failure: &TestFailure,
    seq: i32,
) -> AppResult<()> {
    let model = ActiveModel {
        job_id: Set(failure.job_id),
        name: Set(failure.name.clone()),
        title: Set(failure.title.clone().unwrap_or_default()),
        test_id: Set(failure.test_id),
        seq: Set(seq),
        fail_reason: Set(failure.fail_reason.as_str().to_string()),
        relevant_error: Set(failure.relevant_error.clone()),
        fail_error: Set(failure.fail_error.clone()),
        cleanup_error: Set(failure.cleanup_error.clone()),
        timed_out: Set(failure.timed_out),
        has_description: Set(failure.has_description),
        template: Set(failure.template.clone()),
    };

    TestFailureEntity::insert(model)
        .exec_without_returning(conn)
        .await
        .map_err(|e| AppError::Database(format!("Failed to insert test failure: {}", e)))?;

    Ok(())
}
