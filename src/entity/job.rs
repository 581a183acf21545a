//! Job entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: i64,
    /// Job kind: orphan, child
    pub kind: String,
    pub parent_id: Option<i64>,
    pub job_name: String,
    pub version: String,
    pub flavor: String,
    pub machine: String,
    pub build: String,
    pub worker_id: Option<i64>,
    pub clone_id: Option<i64>,
    pub result: String,
    /// Start time as reported by openQA (naive UTC)
    pub t_started: Option<String>,
    pub valid: bool,
    /// Full `/jobs/{id}/details` payload, serialized
    #[sea_orm(column_type = "Text")]
    pub details: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::test_failure::Entity")]
    TestFailures,
}

impl Related<super::test_failure::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestFailures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
