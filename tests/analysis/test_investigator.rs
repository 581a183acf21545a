//! Searching the recent history of a test suite.

use ci_triage_lib::services::{FailureFilter, GroupBy, investigate};

use super::scripted_source::*;

const SUITE: &str = "system_tests_splitgpg";

fn history() -> ScriptedSource {
    let mut source = ScriptedSource::new();
    source.add(orphan(1, "qubes_pipeline"));
    source
        .add(
            child(2, 1, SUITE)
                .worker(3)
                .failure("TC_00_Direct_debian-12", "test_000_version", "SearchError: descendent of [file chooser]"),
        )
        .add(
            child(3, 1, SUITE)
                .worker(3)
                .failure("TC_00_Direct_debian-12", "test_000_version", "SearchError: descendent of [file chooser]")
                .failure("TC_10_Thunderbird_fedora-39-xfce", "test_010_send", "AssertionError"),
        )
        .add(
            child(4, 1, SUITE)
                .worker(5)
                .failure("TC_00_Direct_fedora-39-xfce", "test_000_version", "SearchError: descendent of [file chooser]"),
        )
        .add(
            child(5, 1, SUITE)
                .failure("TC_00_Direct_debian-12", "test_000_version", "SearchError: descendent of [file chooser]")
                .inconclusive_group("TC_90_Never"),
        )
        .add(child(6, 1, SUITE).worker(5))
        .add(child(7, 1, "system_tests_basic").failure("TC_00_Direct_debian-12", "test_000_version", "x"));
    source
}

#[tokio::test]
async fn test_investigate_filters_by_test_and_error() {
    let mut cache = create_test_cache(history()).await;
    let filter = FailureFilter::from_patterns(Some("TC_00_Direct/test_000"), Some("SearchError")).unwrap();

    let investigation = investigate(&mut cache, SUITE, 100, &filter).await.unwrap();

    // Job 5 is invalid, job 7 belongs to another suite
    assert_eq!(investigation.jobs_considered, 4);
    let ids: Vec<i64> = investigation.jobs.iter().map(|j| j.job_id).collect();
    assert_eq!(ids, vec![2, 3, 4]);
    assert!(investigation.jobs.iter().all(|j| j.failures.len() == 1));

    let by_template = investigation.tally(GroupBy::Template);
    assert_eq!(by_template["debian-12"], 2);
    assert_eq!(by_template["fedora-39-xfce"], 1);

    let by_worker = investigation.tally(GroupBy::Worker);
    assert_eq!(by_worker["3"], 2);
    assert_eq!(by_worker["5"], 1);
}

#[tokio::test]
async fn test_investigate_limits_history() {
    let mut cache = create_test_cache(history()).await;

    let investigation = investigate(&mut cache, SUITE, 2, &FailureFilter::default())
        .await
        .unwrap();

    // Only the two most recent runs (5 invalid, 6 passed) are looked at
    assert_eq!(investigation.jobs_considered, 1);
    assert!(investigation.jobs.is_empty());
    assert_eq!(cache.source().calls().listings[0].limit, Some(2));
    assert_eq!(cache.source().calls().details_of(2), 0);
}
