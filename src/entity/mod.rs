//! SeaORM entity definitions for the SQLite job cache.

pub mod job;
pub mod test_failure;
