use deadpool_redis::redis::AsyncCommands;
use testresult::TestResult;

use cinder::{StateContext, StateHandler, StorageConfig, states};

use crate::shared::*;

fn handler<'a>(
    handlers: &'a [Box<dyn StateHandler>],
    state_name: &str,
) -> &'a dyn StateHandler {
    handlers
        .iter()
        .find(|handler| handler.state_name() == state_name)
        .map(|handler| handler.as_ref())
        .expect("handler not registered")
}

#[tokio::test]
async fn test_storage_registers_all_four_handlers() -> TestResult {
    let storage = setup();
    let handlers = storage.state_handlers();
    let mut names: Vec<&str> = handlers.iter().map(|handler| handler.state_name()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Deleted", "Failed", "Processing", "Succeeded"]);
    Ok(())
}

#[tokio::test]
async fn test_processing_handler_maintains_sorted_set() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let handlers = storage.state_handlers();
    let processing = handler(&handlers, states::PROCESSING);

    let context = StateContext::new("my-job");
    let mut tx = storage.create_write_transaction();
    processing.apply(&context, &mut tx);
    tx.commit().await?;

    let mut redis = redis_pool().get().await?;
    let score: Option<f64> = redis
        .zscore(format!("{prefix}processing"), "my-job")
        .await?;
    let score = score.expect("job missing from processing set");
    assert!((score - context.transitioned_at.timestamp() as f64).abs() < 1.0);

    let mut tx = storage.create_write_transaction();
    processing.unapply(&context, &mut tx);
    tx.commit().await?;

    let score: Option<f64> = redis
        .zscore(format!("{prefix}processing"), "my-job")
        .await?;
    assert!(score.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_handler_maintains_sorted_set() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let handlers = storage.state_handlers();
    let failed = handler(&handlers, states::FAILED);

    let context = StateContext::new("broken-job");
    let mut tx = storage.create_write_transaction();
    failed.apply(&context, &mut tx);
    tx.commit().await?;

    let mut redis = redis_pool().get().await?;
    let members: Vec<String> = redis.zrange(format!("{prefix}failed"), 0, -1).await?;
    assert_eq!(members, vec!["broken-job"]);

    let mut tx = storage.create_write_transaction();
    failed.unapply(&context, &mut tx);
    tx.commit().await?;

    let count: i64 = redis.zcard(format!("{prefix}failed")).await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
async fn test_succeeded_handler_keeps_newest_first_and_caps_length() -> TestResult {
    let storage = setup_with_config(StorageConfig::new().succeeded_list_size(4));
    let prefix = storage.config().prefix.clone();
    let handlers = storage.state_handlers();
    let succeeded = handler(&handlers, states::SUCCEEDED);

    for i in 0..10 {
        let job_id = format!("job-{i}");
        let context = StateContext::new(&job_id);
        let mut tx = storage.create_write_transaction();
        succeeded.apply(&context, &mut tx);
        tx.commit().await?;
    }

    let mut redis = redis_pool().get().await?;
    let items: Vec<String> = redis.lrange(format!("{prefix}succeeded"), 0, -1).await?;
    assert_eq!(items.len(), 5);
    assert_eq!(items[0], "job-9");
    Ok(())
}

#[tokio::test]
async fn test_deleted_handler_unapply_removes_entry() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let handlers = storage.state_handlers();
    let deleted = handler(&handlers, states::DELETED);

    let context = StateContext::new("doomed");
    let mut tx = storage.create_write_transaction();
    deleted.apply(&context, &mut tx);
    tx.commit().await?;

    let mut redis = redis_pool().get().await?;
    let count: i64 = redis.llen(format!("{prefix}deleted")).await?;
    assert_eq!(count, 1);

    let mut tx = storage.create_write_transaction();
    deleted.unapply(&context, &mut tx);
    tx.commit().await?;

    let count: i64 = redis.llen(format!("{prefix}deleted")).await?;
    assert_eq!(count, 0);
    Ok(())
}

#[tokio::test]
async fn test_handlers_compose_with_state_change_in_one_transaction() -> TestResult {
    let storage = setup();
    let prefix = storage.config().prefix.clone();
    let handlers = storage.state_handlers();

    // The way the outer scheduler commits a transition: state rewrite and
    // every matching handler in the same transaction.
    let context = StateContext::new("my-job");
    let state = cinder::StateData::new(states::PROCESSING).with("Server", "s1");
    let mut tx = storage.create_write_transaction();
    tx.set_job_state("my-job", &state);
    for h in &handlers {
        if h.state_name() == states::PROCESSING {
            h.apply(&context, &mut tx);
        }
    }
    tx.commit().await?;

    let mut redis = redis_pool().get().await?;
    let state_name: Option<String> = redis.hget(format!("{prefix}job:my-job"), "State").await?;
    assert_eq!(state_name.as_deref(), Some("Processing"));
    let score: Option<f64> = redis
        .zscore(format!("{prefix}processing"), "my-job")
        .await?;
    assert!(score.is_some());
    Ok(())
}
