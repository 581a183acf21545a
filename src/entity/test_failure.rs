//! Test failure entity for SeaORM.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_failures")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    /// Empty when the test case has no display title
    #[sea_orm(primary_key, auto_increment = false)]
    pub title: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub test_id: i64,
    /// Position within the job's failure list
    pub seq: i32,
    pub fail_reason: String,
    pub relevant_error: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub fail_error: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cleanup_error: Option<String>,
    pub timed_out: bool,
    pub has_description: bool,
    pub template: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::JobId",
        on_delete = "Cascade"
    )]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
