//! Installed-package extraction from uploaded job logs.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::{JobId, PackageMapping, PackageName};
use crate::services::job_cache::JobCache;
use crate::services::job_source::JobSource;

const PACKAGES_LOG_SUFFIX: &str = "packages.txt";

/// Components installed by a job, with the version each log reported.
pub async fn updated_packages<S: JobSource>(
    cache: &mut JobCache<S>,
    mapping: &PackageMapping,
    job_id: JobId,
) -> AppResult<BTreeSet<PackageName>> {
    let job = cache.get_job(job_id).await?;

    let mut packages = BTreeSet::new();
    for log_name in job
        .details
        .ulogs
        .iter()
        .filter(|name| name.ends_with(PACKAGES_LOG_SUFFIX))
    {
        debug!("Reading {} of job {}", log_name, job_id);
        let content = cache.source().job_log(job_id, log_name).await?;
        packages.extend(parse_package_log(&content, mapping));
    }

    warn_on_conflicts(job_id, &packages);
    Ok(packages)
}

/// Mapped packages of one log, unknown and malformed lines skipped.
pub fn parse_package_log(content: &str, mapping: &PackageMapping) -> Vec<PackageName> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .filter_map(|line| PackageName::parse(line, mapping))
        .collect()
}

fn warn_on_conflicts(job_id: JobId, packages: &BTreeSet<PackageName>) {
    let mut versions: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for package in packages {
        versions
            .entry(package.package_name.as_str())
            .or_default()
            .push(package.version.as_str());
    }

    for (name, found) in versions.into_iter().filter(|(_, found)| found.len() > 1) {
        warn!(
            "Job {} installed {} in several versions: {}",
            job_id,
            name,
            found.join(", ")
        );
    }
}
