//! Domain models for CI triage.

pub mod job;
pub mod package_name;
pub mod test_failure;

// Re-export commonly used types
pub use job::{
    Job, JobDetails, JobId, JobKind, JobSummary, TestCaseResult, TestGroupResult, TestKey,
    assess_validity,
};
pub use package_name::{PackageMapping, PackageName};
pub use test_failure::{
    FailReason, FailureSignature, JobResults, SignatureKey, TestFailure, TestIdentity,
};
