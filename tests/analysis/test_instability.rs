//! Historical sampling and instability classification.

use ci_triage_lib::error::AppError;
use ci_triage_lib::services::instability::InstabilityReason;
use ci_triage_lib::services::{InstabilityAnalyzer, diff_results, suppress_unstable};

use super::scripted_source::*;

const SUITE: &str = "system_tests_basic";

/// History of one test suite under a single pipeline job.
///
/// - 95: other machine, never comparable
/// - 100..=105: valid failed runs
/// - 106: failed, but a group never concluded (invalid)
/// - 110: reference run
/// - 111: later passed run
fn history() -> ScriptedSource {
    let mut source = ScriptedSource::new();
    source.add(orphan(1, "qubes_pipeline"));

    source.add(
        child(95, 1, SUITE)
            .setting("MACHINE", "arm64")
            .failure("TC_10_Flaky", "test_000", "AssertionError"),
    );

    for id in 100..=105 {
        let mut run = child(id, 1, SUITE).failure("TC_15_Broken", "test_000", "OSError: disk full");
        if id % 2 == 1 {
            run = run.failure("TC_10_Flaky", "test_000", "AssertionError: no window");
        }
        let varying = if id % 2 == 0 { "KeyError: 'dom0'" } else { "KeyError: 'sys-net'" };
        run = run.failure("TC_20_Varying", "test_000", varying);
        source.add(run);
    }

    source.add(
        child(106, 1, SUITE)
            .failure("TC_10_Flaky", "test_000", "AssertionError: no window")
            .inconclusive_group("TC_99_Never"),
    );
    source.add(
        child(110, 1, SUITE)
            .failure("TC_10_Flaky", "test_000", "AssertionError: no window")
            .failure("TC_50_New", "test_000", "RuntimeError"),
    );
    source.add(child(111, 1, SUITE));
    source
}

#[tokio::test]
async fn test_analyze_flags_intermittent_and_inconsistent() {
    let mut cache = create_test_cache(history()).await;
    let report = InstabilityAnalyzer::new(5).analyze(&mut cache, 110).await.unwrap();

    assert_eq!(report.sampled_jobs, vec![105, 104, 103, 102, 101]);

    let flagged: Vec<(&str, InstabilityReason, usize, bool)> = report
        .unstable
        .iter()
        .map(|u| (u.identity.name.as_str(), u.reason, u.failed_in, u.currently_failing))
        .collect();
    assert_eq!(
        flagged,
        vec![
            ("TC_10_Flaky", InstabilityReason::Intermittent, 3, true),
            ("TC_20_Varying", InstabilityReason::InconsistentError, 5, false),
        ]
    );
    assert_eq!(report.unstable[1].errors.len(), 2);
}

#[tokio::test]
async fn test_sampling_window_queries() {
    let mut cache = create_test_cache(history()).await;
    InstabilityAnalyzer::new(5).analyze(&mut cache, 110).await.unwrap();

    let listings = cache.source().calls().listings;
    assert_eq!(listings.len(), 4);

    // Newest concluded run of each result first
    for (query, result) in listings[..2].iter().zip(["passed", "failed"]) {
        assert_eq!(query.result.as_deref(), Some(result));
        assert_eq!(query.limit, Some(1));
    }

    // One newer job plus twice the sample size
    for (query, result) in listings[2..].iter().zip(["passed", "failed"]) {
        assert_eq!(query.result.as_deref(), Some(result));
        assert_eq!(query.limit, Some(11));
        assert_eq!(query.test.as_deref(), Some(SUITE));
        assert_eq!(query.flavor.as_deref(), Some(FLAVOR));
        assert_eq!(query.machine.as_deref(), Some(MACHINE));
    }
}

#[tokio::test]
async fn test_unfinished_newer_jobs_do_not_widen_window() {
    let mut source = history();
    source
        .add(child(130, 1, SUITE).result("incomplete"))
        .add(child(140, 1, SUITE).result("running"));
    let mut cache = create_test_cache(source).await;

    let report = InstabilityAnalyzer::new(5).analyze(&mut cache, 110).await.unwrap();
    assert_eq!(report.sampled_jobs, vec![105, 104, 103, 102, 101]);

    let listings = cache.source().calls().listings;
    assert!(listings.iter().all(|q| q.result.is_some()));
    assert_eq!(listings[2].limit, Some(11));
    assert_eq!(listings[3].limit, Some(11));
}

#[tokio::test]
async fn test_jobs_without_flavor_are_sampled() {
    let mut source = ScriptedSource::new();
    source.add(orphan(1, "qubes_pipeline"));
    for id in 200..=205 {
        source.add(child(id, 1, SUITE).without_setting("FLAVOR"));
    }
    let mut cache = create_test_cache(source).await;

    let report = InstabilityAnalyzer::new(3).analyze(&mut cache, 205).await.unwrap();
    assert_eq!(report.sampled_jobs, vec![204, 203, 202]);
    assert_eq!(report.test_key.flavor, "");

    let listings = cache.source().calls().listings;
    assert!(!listings.is_empty());
    for query in &listings {
        assert_eq!(query.flavor, None);
        assert_eq!(query.version.as_deref(), Some(VERSION));
    }
}

#[tokio::test]
async fn test_invalid_jobs_are_skipped() {
    let mut source = history();
    source.add(
        child(112, 1, SUITE)
            .failure("TC_10_Flaky", "test_000", "AssertionError: no window")
            .failure("TC_15_Broken", "test_000", "OSError: disk full"),
    );
    let mut cache = create_test_cache(source).await;

    let report = InstabilityAnalyzer::new(3).analyze(&mut cache, 112).await.unwrap();
    assert_eq!(report.sampled_jobs, vec![111, 110, 105]);
    assert!(!cache.is_valid(106).await.unwrap());
}

#[tokio::test]
async fn test_reference_outside_window_uses_closest_preceding() {
    let mut source = history();
    source.add(child(108, 1, SUITE).result("incomplete"));
    let mut cache = create_test_cache(source).await;

    let report = InstabilityAnalyzer::new(2).analyze(&mut cache, 108).await.unwrap();
    assert_eq!(report.sampled_jobs, vec![105, 104]);
}

#[tokio::test]
async fn test_short_history_is_not_an_error() {
    let mut cache = create_test_cache(history()).await;

    let report = InstabilityAnalyzer::new(10).analyze(&mut cache, 110).await.unwrap();
    assert_eq!(report.requested_samples, 10);
    assert_eq!(report.sampled_jobs, vec![105, 104, 103, 102, 101, 100]);
    assert!(!report.sampled_jobs.contains(&95));
}

#[tokio::test]
async fn test_orphan_reference_is_rejected() {
    let mut cache = create_test_cache(history()).await;
    let err = InstabilityAnalyzer::new(5).analyze(&mut cache, 1).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_unstable_regressions_are_suppressed() {
    let mut cache = create_test_cache(history()).await;

    let current = cache.comparable_results(110).await.unwrap();
    let reference = cache.comparable_results(104).await.unwrap();
    let mut diff = diff_results(&current, &[reference]);

    let report = InstabilityAnalyzer::new(5).analyze(&mut cache, 110).await.unwrap();
    suppress_unstable(&mut diff, SUITE, &report);

    let new: Vec<(&str, bool)> = diff.new_failures()[SUITE]
        .iter()
        .map(|f| (f.failure.name.as_str(), f.unstable))
        .collect();
    assert_eq!(new, vec![("TC_10_Flaky", true), ("TC_50_New", false)]);
}
