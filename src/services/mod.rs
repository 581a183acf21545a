//! Analysis services.

pub mod classifier;
pub mod diff;
pub mod instability;
pub mod investigator;
pub mod job_cache;
pub mod job_source;
pub mod packages;

pub use diff::{ResultsDiff, diff_results};
pub use instability::{InstabilityAnalyzer, InstabilityReport, suppress_unstable};
pub use investigator::{FailureFilter, GroupBy, investigate};
pub use job_cache::JobCache;
pub use job_source::{JobQuery, JobSource, OpenQaClient};
pub use packages::updated_packages;
