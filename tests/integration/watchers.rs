use std::time::Duration;

use chrono::Utc;
use deadpool_redis::redis::AsyncCommands;
use testresult::TestResult;

use cinder::{StorageConfig, format_timestamp};

use crate::shared::*;

/// Plants a job ID directly into a queue's dequeue list, as if a worker
/// fetched it and vanished.
async fn plant_dequeued(prefix: &str, queue: &str, job_id: &str) -> TestResult {
    let mut redis = redis_pool().get().await?;
    let _: () = redis.sadd(format!("{prefix}queues"), queue).await?;
    let _: () = redis
        .lpush(format!("{prefix}queue:{queue}:dequeued"), job_id)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_recovers_job_fetched_beyond_invisibility_timeout() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    plant_dequeued(&prefix, "q", "job-x").await?;
    let mut redis = redis_pool().get().await?;
    let fetched = format_timestamp(Utc::now() - chrono::Duration::minutes(31));
    let _: () = redis
        .hset(format!("{prefix}job:job-x"), "Fetched", fetched)
        .await?;

    let requeued = storage.fetched_jobs_watcher().sweep().await?;
    assert_eq!(requeued, 1);

    let in_flight: i64 = redis.llen(format!("{prefix}queue:q:dequeued")).await?;
    assert_eq!(in_flight, 0);
    let head: Option<String> = redis.lindex(format!("{prefix}queue:q"), 0).await?;
    assert_eq!(head.as_deref(), Some("job-x"));
    let has_fetched: bool = redis.hexists(format!("{prefix}job:job-x"), "Fetched").await?;
    assert!(!has_fetched);
    Ok(())
}

#[tokio::test]
async fn test_leaves_recently_fetched_job_alone() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    plant_dequeued(&prefix, "q", "job-x").await?;
    let mut redis = redis_pool().get().await?;
    let _: () = redis
        .hset(
            format!("{prefix}job:job-x"),
            "Fetched",
            format_timestamp(Utc::now()),
        )
        .await?;

    let requeued = storage.fetched_jobs_watcher().sweep().await?;
    assert_eq!(requeued, 0);

    let in_flight: i64 = redis.llen(format!("{prefix}queue:q:dequeued")).await?;
    assert_eq!(in_flight, 1);
    Ok(())
}

#[tokio::test]
async fn test_first_observation_marks_job_checked() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    plant_dequeued(&prefix, "q", "job-x").await?;

    let requeued = storage.fetched_jobs_watcher().sweep().await?;
    assert_eq!(requeued, 0);

    let mut redis = redis_pool().get().await?;
    let checked: Option<String> = redis.hget(format!("{prefix}job:job-x"), "Checked").await?;
    assert!(checked.is_some());
    let in_flight: i64 = redis.llen(format!("{prefix}queue:q:dequeued")).await?;
    assert_eq!(in_flight, 1);
    Ok(())
}

#[tokio::test]
async fn test_recovers_job_checked_beyond_checked_timeout() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    plant_dequeued(&prefix, "q", "job-x").await?;
    let mut redis = redis_pool().get().await?;
    let checked = format_timestamp(Utc::now() - chrono::Duration::minutes(2));
    let _: () = redis
        .hset(format!("{prefix}job:job-x"), "Checked", checked)
        .await?;

    let requeued = storage.fetched_jobs_watcher().sweep().await?;
    assert_eq!(requeued, 1);

    let head: Option<String> = redis.lindex(format!("{prefix}queue:q"), 0).await?;
    assert_eq!(head.as_deref(), Some("job-x"));
    let has_checked: bool = redis.hexists(format!("{prefix}job:job-x"), "Checked").await?;
    assert!(!has_checked);
    Ok(())
}

#[tokio::test]
async fn test_skips_queue_whose_lock_is_held() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let connection = storage.connection();

    plant_dequeued(&prefix, "q", "job-x").await?;
    let mut redis = redis_pool().get().await?;
    let fetched = format_timestamp(Utc::now() - chrono::Duration::minutes(31));
    let _: () = redis
        .hset(format!("{prefix}job:job-x"), "Fetched", fetched)
        .await?;

    let lock = connection
        .acquire_distributed_lock("queue:q:dequeued:lock", Duration::from_secs(30))
        .await?;

    // Sweep with a short lock timeout so the held lock is detected fast.
    let contended = setup_contended(&storage);
    let requeued = contended.fetched_jobs_watcher().sweep().await?;
    assert_eq!(requeued, 0);

    let in_flight: i64 = redis.llen(format!("{prefix}queue:q:dequeued")).await?;
    assert_eq!(in_flight, 1);

    lock.release().await?;
    Ok(())
}

/// Same storage, but with a lock timeout short enough for a test.
fn setup_contended(storage: &cinder::Storage) -> cinder::Storage {
    cinder::Storage::builder()
        .url(redis_url())
        .config(
            StorageConfig::new()
                .prefix(storage.config().prefix.clone())
                .fetched_lock_timeout(Duration::from_millis(300)),
        )
        .build()
        .expect("failed to build storage")
}

#[tokio::test]
async fn test_expired_sweep_removes_dangling_references() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    let mut redis = redis_pool().get().await?;
    let _: () = redis.rpush(format!("{prefix}succeeded"), "a").await?;
    let _: () = redis.rpush(format!("{prefix}succeeded"), "b").await?;
    let _: () = redis
        .hset(format!("{prefix}job:b"), "State", "Succeeded")
        .await?;

    let removed = storage.expired_jobs_watcher().sweep().await?;
    assert_eq!(removed, 1);

    let remaining: Vec<String> = redis.lrange(format!("{prefix}succeeded"), 0, -1).await?;
    assert_eq!(remaining, vec!["b"]);
    Ok(())
}

#[tokio::test]
async fn test_expired_sweep_covers_deleted_list() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    let mut redis = redis_pool().get().await?;
    let _: () = redis.rpush(format!("{prefix}deleted"), "gone").await?;

    let removed = storage.expired_jobs_watcher().sweep().await?;
    assert_eq!(removed, 1);

    let remaining: i64 = redis.llen(format!("{prefix}deleted")).await?;
    assert_eq!(remaining, 0);
    Ok(())
}

#[tokio::test]
async fn test_expired_sweep_walks_batches_beyond_one_hundred() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    let mut redis = redis_pool().get().await?;
    for i in 0..230 {
        let job_id = format!("job-{i}");
        let _: () = redis.rpush(format!("{prefix}succeeded"), &job_id).await?;
        // Keep every third job's record alive.
        if i % 3 == 0 {
            let _: () = redis
                .hset(format!("{prefix}job:{job_id}"), "State", "Succeeded")
                .await?;
        }
    }

    let removed = storage.expired_jobs_watcher().sweep().await?;
    assert_eq!(removed, 230 - 77);

    let remaining: i64 = redis.llen(format!("{prefix}succeeded")).await?;
    assert_eq!(remaining, 77);
    Ok(())
}

#[tokio::test]
async fn test_expired_sweep_ignores_live_references() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();

    let mut redis = redis_pool().get().await?;
    let _: () = redis.rpush(format!("{prefix}succeeded"), "alive").await?;
    let _: () = redis
        .hset(format!("{prefix}job:alive"), "State", "Succeeded")
        .await?;

    let removed = storage.expired_jobs_watcher().sweep().await?;
    assert_eq!(removed, 0);

    let remaining: i64 = redis.llen(format!("{prefix}succeeded")).await?;
    assert_eq!(remaining, 1);
    Ok(())
}
