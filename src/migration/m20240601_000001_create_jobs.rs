//! Migration: Create jobs table.
//!
//! One row per openQA job ever seen; rows are never updated or deleted.

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
                CREATE TABLE jobs (
                    job_id INTEGER PRIMARY KEY NOT NULL, -- assigned by openQA

                    kind VARCHAR(10) NOT NULL
                        CHECK (kind IN ('orphan', 'child')),
                    -- Only child jobs have a parent, and it is always cached first
                    parent_id INTEGER REFERENCES jobs(job_id),

                    job_name TEXT NOT NULL,
                    version TEXT NOT NULL DEFAULT '',
                    flavor TEXT NOT NULL DEFAULT '',
                    machine TEXT NOT NULL DEFAULT '',
                    build TEXT NOT NULL DEFAULT '',
                    worker_id INTEGER,
                    clone_id INTEGER,
                    result VARCHAR(32) NOT NULL,
                    t_started TEXT,
                    valid BOOLEAN NOT NULL,

                    -- Raw /jobs/{id}/details payload
                    details TEXT NOT NULL,

                    CHECK ((kind = 'orphan') = (parent_id IS NULL))
                );

                -- Sampling lookups by test key
                CREATE INDEX idx_jobs_test_key ON jobs(job_name, version, flavor, machine);
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
                DROP INDEX IF EXISTS idx_jobs_test_key;
                DROP TABLE IF EXISTS jobs;
                "#,
            )
            .await?;

        Ok(())
    }
}
