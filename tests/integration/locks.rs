use std::time::Duration;

use deadpool_redis::redis::AsyncCommands;
use testresult::TestResult;

use cinder::CinderError;

use crate::shared::*;

#[tokio::test]
async fn test_lock_excludes_second_holder() -> TestResult {
    let storage = setup();
    let connection = storage.connection();

    let lock = connection
        .acquire_distributed_lock("resource", Duration::from_secs(30))
        .await?;

    let denied = connection
        .acquire_distributed_lock("resource", Duration::from_millis(400))
        .await;
    assert!(matches!(denied, Err(CinderError::LockTimeout { .. })));

    lock.release().await?;

    let reacquired = connection
        .acquire_distributed_lock("resource", Duration::from_millis(400))
        .await?;
    reacquired.release().await?;
    Ok(())
}

#[tokio::test]
async fn test_lock_key_is_prefixed() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let connection = storage.connection();

    let lock = connection
        .acquire_distributed_lock("resource", Duration::from_secs(30))
        .await?;
    assert_eq!(lock.key(), format!("{prefix}resource"));

    let mut redis = redis_pool().get().await?;
    let exists: bool = redis.exists(format!("{prefix}resource")).await?;
    assert!(exists);

    lock.release().await?;
    let exists: bool = redis.exists(format!("{prefix}resource")).await?;
    assert!(!exists);
    Ok(())
}

#[tokio::test]
async fn test_dropped_lock_releases_in_background() -> TestResult {
    let storage = setup();
    let connection = storage.connection();

    {
        let _lock = connection
            .acquire_distributed_lock("resource", Duration::from_secs(30))
            .await?;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    let reacquired = connection
        .acquire_distributed_lock("resource", Duration::from_millis(400))
        .await?;
    reacquired.release().await?;
    Ok(())
}

#[tokio::test]
async fn test_lock_waits_for_release_within_deadline() -> TestResult {
    let storage = setup();
    let connection = storage.connection();

    let lock = connection
        .acquire_distributed_lock("resource", Duration::from_secs(5))
        .await?;

    let waiter = storage.connection();
    let waiting = tokio::spawn(async move {
        waiter
            .acquire_distributed_lock("resource", Duration::from_secs(5))
            .await
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    lock.release().await?;

    let acquired = waiting.await??;
    acquired.release().await?;
    Ok(())
}

#[tokio::test]
async fn test_expired_lock_can_be_reacquired() -> TestResult {
    let storage = setup();
    let connection = storage.connection();

    // The Redis-side expiry equals the acquisition timeout, so an
    // abandoned short lock frees itself.
    let lock = connection
        .acquire_distributed_lock("resource", Duration::from_millis(300))
        .await?;
    std::mem::forget(lock);

    tokio::time::sleep(Duration::from_millis(500)).await;

    let reacquired = connection
        .acquire_distributed_lock("resource", Duration::from_millis(400))
        .await?;
    reacquired.release().await?;
    Ok(())
}
