use deadpool_redis::redis;

use crate::error::CinderError;
use crate::job::fields;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOutcome {
    Pending,
    Acknowledged,
    Requeued,
}

/// A job pulled from a queue, scoped to the worker holding it.
///
/// Call [`remove_from_queue`](Self::remove_from_queue) after successful
/// processing, or [`requeue`](Self::requeue) to hand the job back. A
/// handle dropped without either is requeued in the background, so an
/// error path that loses the handle cannot lose the job.
pub struct FetchedJob {
    storage: Storage,
    job_id: String,
    queue: String,
    outcome: FetchOutcome,
}

impl FetchedJob {
    pub(crate) fn new(storage: Storage, job_id: String, queue: String) -> Self {
        Self {
            storage,
            job_id,
            queue,
            outcome: FetchOutcome::Pending,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Acknowledges the job: removes it from the dequeue list and clears
    /// the fetch-tracking fields from the job hash.
    pub async fn remove_from_queue(&mut self) -> Result<(), CinderError> {
        let keys = self.storage.keys();
        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .lrem(keys.dequeued(&self.queue), -1, &self.job_id)
            .hdel(keys.job(&self.job_id), &[fields::FETCHED, fields::CHECKED])
            .query_async(&mut redis)
            .await?;
        self.outcome = FetchOutcome::Acknowledged;
        tracing::debug!(job_id = %self.job_id, queue = %self.queue, "acknowledged job");
        Ok(())
    }

    /// Pushes the job back onto its queue and runs the same dequeue-list
    /// and tracking-field cleanup as an acknowledgement.
    pub async fn requeue(&mut self) -> Result<(), CinderError> {
        Self::push_back(&self.storage, &self.queue, &self.job_id).await?;
        self.outcome = FetchOutcome::Requeued;
        tracing::debug!(job_id = %self.job_id, queue = %self.queue, "requeued job");
        Ok(())
    }

    async fn push_back(storage: &Storage, queue: &str, job_id: &str) -> Result<(), CinderError> {
        let keys = storage.keys();
        let mut redis = storage.get_pooled_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .rpush(keys.queue(queue), job_id)
            .lrem(keys.dequeued(queue), -1, job_id)
            .hdel(keys.job(job_id), &[fields::FETCHED, fields::CHECKED])
            .query_async(&mut redis)
            .await?;
        Ok(())
    }
}

impl Drop for FetchedJob {
    fn drop(&mut self) {
        if self.outcome != FetchOutcome::Pending {
            return;
        }
        let storage = self.storage.clone();
        let queue = std::mem::take(&mut self.queue);
        let job_id = std::mem::take(&mut self.job_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match Self::push_back(&storage, &queue, &job_id).await {
                        Ok(()) => {
                            tracing::warn!(job_id, queue, "requeued job dropped without acknowledgement");
                        }
                        Err(err) => {
                            // The invisibility sweep picks it up later.
                            tracing::error!(job_id, queue, %err, "failed to requeue dropped job");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    job_id,
                    queue,
                    "fetched job dropped outside a runtime; the invisibility sweep will reclaim it"
                );
            }
        }
    }
}
