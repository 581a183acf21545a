//! Migration: Create test_failures table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE test_failures (
                    job_id INTEGER NOT NULL REFERENCES jobs(job_id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    test_id INTEGER NOT NULL,
                    seq INTEGER NOT NULL,

                    fail_reason VARCHAR(32) NOT NULL,
                    relevant_error TEXT,
                    fail_error TEXT,
                    cleanup_error TEXT,
                    timed_out BOOLEAN NOT NULL DEFAULT 0,
                    has_description BOOLEAN NOT NULL DEFAULT 1,
                    template TEXT NOT NULL DEFAULT 'default',

                    PRIMARY KEY (job_id, name, title, test_id)
                );

                -- Instability analysis groups failures by test identity
                CREATE INDEX idx_test_failures_identity ON test_failures(name, title, test_id);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP INDEX IF EXISTS idx_test_failures_identity;
                DROP TABLE IF EXISTS test_failures;
                "#,
            )
            .await?;

        Ok(())
    }
}
