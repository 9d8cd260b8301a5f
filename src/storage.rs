use std::sync::Arc;

use deadpool_redis::redis;

use crate::config::StorageConfig;
use crate::connection::Connection;
use crate::error::CinderError;
use crate::expired_jobs_watcher::ExpiredJobsWatcher;
use crate::fetched_jobs_watcher::FetchedJobsWatcher;
use crate::state_handlers::{
    DeletedStateHandler, FailedStateHandler, ProcessingStateHandler, StateHandler,
    SucceededStateHandler,
};
use crate::storage_builder::StorageBuilder;
use crate::storage_keys::StorageKeys;
use crate::subscription::FetchSubscription;
use crate::transaction::WriteTransaction;

/// Owns the Redis pool, the configuration and the key layout, and hands
/// out everything built on top of them: per-worker [`Connection`]s,
/// [`WriteTransaction`]s, the two watchers, the state handlers and the
/// fetch subscription.
///
/// Cheap to clone; clones share the pool and the subscription latch.
#[derive(Clone)]
pub struct Storage {
    pool: deadpool_redis::Pool,
    config: Arc<StorageConfig>,
    keys: Arc<StorageKeys>,
    subscription: Arc<FetchSubscription>,
}

impl Storage {
    /// Starts configuring a new storage instance.
    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn new(
        pool: deadpool_redis::Pool,
        client: redis::Client,
        config: StorageConfig,
    ) -> Self {
        let keys = Arc::new(StorageKeys::new(config.prefix.clone()));
        let subscription = Arc::new(FetchSubscription::new(client, keys.fetch_channel.clone()));
        Self {
            pool,
            config: Arc::new(config),
            keys,
            subscription,
        }
    }

    /// A fresh per-worker handle. Holds no Redis connection of its own;
    /// every call checks one out of the shared pool.
    pub fn connection(&self) -> Connection {
        Connection::new(self.clone())
    }

    /// Starts a write transaction. Nothing reaches Redis until `commit`.
    pub fn create_write_transaction(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(self)
    }

    /// The state handlers the outer scheduler composes into every
    /// state-change transaction, sized from this storage's configuration.
    pub fn state_handlers(&self) -> Vec<Box<dyn StateHandler>> {
        vec![
            Box::new(ProcessingStateHandler),
            Box::new(FailedStateHandler),
            Box::new(SucceededStateHandler::new(self.config.succeeded_list_size)),
            Box::new(DeletedStateHandler::new(self.config.deleted_list_size)),
        ]
    }

    /// The recovery watcher for jobs abandoned by dead workers.
    pub fn fetched_jobs_watcher(&self) -> FetchedJobsWatcher {
        FetchedJobsWatcher::new(self.clone())
    }

    /// The sweeper that prunes dangling entries from the capped lists.
    pub fn expired_jobs_watcher(&self) -> ExpiredJobsWatcher {
        ExpiredJobsWatcher::new(self.clone())
    }

    /// The shared pub/sub receiver. Spawn its `run` before fetching, or
    /// idle workers will only wake on the fetch-timeout poll.
    pub fn subscription(&self) -> Arc<FetchSubscription> {
        Arc::clone(&self.subscription)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub(crate) fn pool(&self) -> &deadpool_redis::Pool {
        &self.pool
    }

    pub(crate) async fn get_pooled_connection(
        &self,
    ) -> Result<deadpool_redis::Connection, CinderError> {
        self.pool.get().await.map_err(CinderError::Pool)
    }
}
