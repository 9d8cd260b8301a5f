use deadpool_redis::redis::{self, AsyncCommands};
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundProcess;
use crate::error::CinderError;
use crate::storage::Storage;

/// How many list entries one existence check covers.
const BATCH_SIZE: isize = 100;

/// Prunes `succeeded` and `deleted` entries whose job record has expired.
///
/// Terminal states put a TTL on the job keys; once Redis drops them, the
/// IDs left in the capped lists dangle. The sweep walks each list from
/// tail to head in batches, checks which job hashes still exist with one
/// pipelined round trip, and removes the rest through a write transaction
/// per batch.
pub struct ExpiredJobsWatcher {
    storage: Storage,
}

impl ExpiredJobsWatcher {
    pub(crate) fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// One sweep over both capped lists. Returns how many dangling entries
    /// were removed.
    pub async fn sweep(&self) -> Result<usize, CinderError> {
        let keys = self.storage.keys();
        let mut removed = 0;
        removed += self.sweep_list("succeeded", &keys.succeeded).await?;
        removed += self.sweep_list("deleted", &keys.deleted).await?;
        Ok(removed)
    }

    async fn sweep_list(&self, list: &str, full_key: &str) -> Result<usize, CinderError> {
        let keys = self.storage.keys();
        let mut redis = self.storage.get_pooled_connection().await?;
        let total: isize = redis.llen(full_key).await?;
        let mut removed = 0;
        let mut scanned: isize = 0;

        while scanned < total {
            let stop = total - scanned - 1;
            let start = (total - scanned - BATCH_SIZE).max(0);
            let job_ids: Vec<String> = redis.lrange(full_key, start, stop).await?;
            if job_ids.is_empty() {
                break;
            }
            scanned += job_ids.len() as isize;

            let mut pipe = redis::pipe();
            for job_id in &job_ids {
                pipe.exists(keys.job(job_id));
            }
            let exists: Vec<bool> = pipe.query_async(&mut redis).await?;

            let dangling: Vec<&String> = job_ids
                .iter()
                .zip(&exists)
                .filter(|(_, alive)| !**alive)
                .map(|(job_id, _)| job_id)
                .collect();
            if dangling.is_empty() {
                continue;
            }

            let mut transaction = self.storage.create_write_transaction();
            for job_id in &dangling {
                transaction.remove_from_list(list, job_id);
            }
            transaction.commit().await?;

            removed += dangling.len();
            tracing::info!(list, count = dangling.len(), "removed dangling job references");
        }

        Ok(removed)
    }
}

#[async_trait::async_trait]
impl BackgroundProcess for ExpiredJobsWatcher {
    async fn run(&self, token: CancellationToken) -> Result<(), CinderError> {
        tracing::info!("starting expired-jobs watcher");

        loop {
            // Transient storage errors are retried on the next cycle.
            if let Err(err) = self.sweep().await {
                tracing::warn!(%err, "expiry sweep failed");
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.storage.config().expiry_check_interval) => {}
            }
        }
    }
}
