use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundProcess;
use crate::error::CinderError;
use crate::fetched_job::FetchedJob;
use crate::job::{fields, format_timestamp, parse_timestamp};
use crate::storage::Storage;

/// Re-queues jobs whose workers died mid-flight.
///
/// Every fetch leaves a `Fetched` timestamp on the job hash; a worker that
/// never acknowledges within the invisibility timeout forfeits the job. A
/// job sitting in a dequeue list with neither flag (its fetcher has not
/// written `Fetched` yet, or wrote it and crashed between commands) gets a
/// `Checked` mark first and is reclaimed only after the checked timeout,
/// which gives the fetching worker time to catch up.
pub struct FetchedJobsWatcher {
    storage: Storage,
}

impl FetchedJobsWatcher {
    pub(crate) fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// One recovery pass over every known queue. Each queue is processed
    /// under a distributed lock so concurrent instances do not requeue the
    /// same job twice; a queue whose lock is busy is skipped. Returns how
    /// many jobs were re-queued.
    pub async fn sweep(&self) -> Result<usize, CinderError> {
        let keys = self.storage.keys();
        let config = self.storage.config();
        let connection = self.storage.connection();
        let mut redis = self.storage.get_pooled_connection().await?;
        let queues: Vec<String> = redis.smembers(&keys.queues).await?;
        let mut requeued = 0;

        for queue in queues {
            let lock = match connection
                .acquire_distributed_lock(
                    &format!("queue:{queue}:dequeued:lock"),
                    config.fetched_lock_timeout,
                )
                .await
            {
                Ok(lock) => lock,
                Err(CinderError::LockTimeout { .. }) => {
                    // Another instance is recovering this queue.
                    continue;
                }
                Err(err) => return Err(err),
            };

            let job_ids: Vec<String> = redis.lrange(keys.dequeued(&queue), 0, -1).await?;
            for job_id in job_ids {
                let mut cmd = redis::cmd("HMGET");
                cmd.arg(keys.job(&job_id))
                    .arg(fields::FETCHED)
                    .arg(fields::CHECKED);
                let flags: Vec<Option<String>> = cmd.query_async(&mut redis).await?;

                let fetched_at = flags
                    .first()
                    .and_then(|value| value.as_deref())
                    .and_then(parse_timestamp);
                let checked_at = flags
                    .get(1)
                    .and_then(|value| value.as_deref())
                    .and_then(parse_timestamp);

                if fetched_at.is_none() && checked_at.is_none() {
                    // First observation; mark it and decide on a later pass.
                    let _: () = redis
                        .hset(
                            keys.job(&job_id),
                            fields::CHECKED,
                            format_timestamp(Utc::now()),
                        )
                        .await?;
                    continue;
                }

                if self.timed_out(fetched_at, checked_at) {
                    tracing::info!(job_id, queue, "re-queueing abandoned job");
                    let mut handle =
                        FetchedJob::new(self.storage.clone(), job_id, queue.clone());
                    handle.requeue().await?;
                    requeued += 1;
                }
            }

            lock.release().await?;
        }

        Ok(requeued)
    }

    fn timed_out(
        &self,
        fetched_at: Option<DateTime<Utc>>,
        checked_at: Option<DateTime<Utc>>,
    ) -> bool {
        let config = self.storage.config();
        let now = Utc::now();
        match (fetched_at, checked_at) {
            (Some(fetched), _) => {
                now.signed_duration_since(fetched)
                    > chrono::Duration::from_std(config.invisibility_timeout)
                        .unwrap_or(chrono::Duration::MAX)
            }
            (None, Some(checked)) => {
                now.signed_duration_since(checked)
                    > chrono::Duration::from_std(config.checked_timeout)
                        .unwrap_or(chrono::Duration::MAX)
            }
            (None, None) => false,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundProcess for FetchedJobsWatcher {
    async fn run(&self, token: CancellationToken) -> Result<(), CinderError> {
        tracing::info!("starting fetched-jobs watcher");

        loop {
            match self.sweep().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "recovered abandoned jobs"),
                // Transient storage errors are retried on the next cycle.
                Err(err) => tracing::warn!(%err, "recovery pass failed"),
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.storage.config().sleep_timeout) => {}
            }
        }
    }
}
