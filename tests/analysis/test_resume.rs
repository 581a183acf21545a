//! File-backed cache survives across runs.

use ci_triage_lib::config::Config;
use ci_triage_lib::db::DbPool;
use ci_triage_lib::error::AppError;
use ci_triage_lib::services::JobCache;
use serde_json::json;

use super::scripted_source::*;

fn source() -> ScriptedSource {
    let mut source = ScriptedSource::new();
    source.add(orphan(1, "qubes_pipeline")).add(
        child(2, 1, "system_tests_basic")
            .worker(7)
            .field("state", json!("done"))
            .field("group", json!({"id": 3, "name": "Qubes PRs"}))
            .failure("TC_00_Basic", "test_000_qubes_prefs", "AssertionError: prefs"),
    );
    source
}

#[tokio::test]
async fn test_second_run_reads_from_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_db: Some(dir.path().join("cache").join("jobs.db")),
        ..Config::default()
    };

    let first_results = {
        let db = DbPool::new(&config).await.unwrap();
        let mut cache = JobCache::new(db, source());
        let results = cache.results(2).await.unwrap();
        assert_eq!(cache.source().calls().details.len(), 2);
        results
    };

    let db = DbPool::new(&config).await.unwrap();
    let mut cache = JobCache::new(db, source());

    let job = cache.get_job(2).await.unwrap();
    assert_eq!(job.worker_id, Some(7));
    assert_eq!(job.parent_id(), Some(1));
    assert!(job.valid);
    assert_eq!(cache.results(2).await.unwrap(), first_results);

    let calls = cache.source().calls();
    assert!(calls.summaries.is_empty(), "unexpected fetches: {:?}", calls.summaries);
    assert!(calls.details.is_empty());
}

#[tokio::test]
async fn test_cached_details_keep_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_db: Some(dir.path().join("jobs.db")),
        ..Config::default()
    };

    {
        let db = DbPool::new(&config).await.unwrap();
        JobCache::new(db, source()).get_job(2).await.unwrap();
    }

    let db = DbPool::new(&config).await.unwrap();
    assert_eq!(db.count_jobs_by_name("system_tests_basic").await.unwrap(), 1);

    let mut cache = JobCache::new(db, source());
    let job = cache.get_job(2).await.unwrap();
    assert_eq!(job.version, VERSION);
    assert_eq!(job.details.setting("FLAVOR").as_deref(), Some(FLAVOR));
}

#[tokio::test]
async fn test_cached_details_keep_unmodelled_fields() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_db: Some(dir.path().join("jobs.db")),
        ..Config::default()
    };

    {
        let db = DbPool::new(&config).await.unwrap();
        JobCache::new(db, source()).get_job(2).await.unwrap();
    }

    let db = DbPool::new(&config).await.unwrap();
    let mut cache = JobCache::new(db, source());
    let job = cache.get_job(2).await.unwrap();
    assert!(cache.source().calls().details.is_empty());
    assert_eq!(job.details.extra["state"], json!("done"));
    assert_eq!(job.details.extra["group"]["name"], json!("Qubes PRs"));
}

#[tokio::test]
async fn test_interrupted_write_leaves_no_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        cache_db: Some(dir.path().join("jobs.db")),
        ..Config::default()
    };

    // Build the rows in a scratch cache
    let (parent, job, failure) = {
        let mut scratch = create_test_cache(source()).await;
        let mut results = scratch.results(2).await.unwrap();
        let failure = results.remove("system_tests_basic").unwrap().remove(0);
        (
            scratch.get_job(1).await.unwrap(),
            scratch.get_job(2).await.unwrap(),
            failure,
        )
    };

    {
        let db = DbPool::new(&config).await.unwrap();
        db.insert_job_with_failures(&parent, &[]).await.unwrap();

        // The second failure row collides with the first and aborts the write
        let err = db
            .insert_job_with_failures(&job, &[failure.clone(), failure])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)), "got {:?}", err);

        assert!(db.get_job_by_id(2).await.unwrap().is_none());
        assert!(db.get_failures_by_job_id(2).await.unwrap().is_empty());
        assert!(db.get_job_by_id(1).await.unwrap().is_some());
    }

    // A later run fetches the job again instead of serving it without failures
    let db = DbPool::new(&config).await.unwrap();
    let mut cache = JobCache::new(db, source());
    assert!(cache.is_valid(2).await.unwrap());
    assert_eq!(cache.results(2).await.unwrap()["system_tests_basic"].len(), 1);

    let calls = cache.source().calls();
    assert_eq!(calls.details_of(2), 1);
    assert_eq!(calls.details_of(1), 0);
}
