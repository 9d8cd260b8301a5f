/// Centralizes the Redis key naming scheme used throughout the core.
///
/// Every key carries the configured prefix so that related keys share one
/// cluster hash-tag and cross-key pipelines stay on a single slot.
#[derive(Debug, Clone)]
pub(crate) struct StorageKeys {
    prefix: String,
    /// Redis set holding the names of all known queues.
    pub(crate) queues: String,
    /// Redis set of registered server IDs.
    pub(crate) servers: String,
    /// Capped Redis list of recently succeeded job IDs.
    pub(crate) succeeded: String,
    /// Capped Redis list of recently deleted job IDs.
    pub(crate) deleted: String,
    /// Pub/sub channel that wakes blocked fetchers.
    pub(crate) fetch_channel: String,
}

impl StorageKeys {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            queues: format!("{prefix}queues"),
            servers: format!("{prefix}servers"),
            succeeded: format!("{prefix}succeeded"),
            deleted: format!("{prefix}deleted"),
            fetch_channel: format!("{prefix}JobFetchChannel"),
            prefix,
        }
    }

    /// Applies the prefix to a caller-supplied logical key.
    pub(crate) fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// List of pending job IDs for a queue.
    pub(crate) fn queue(&self, queue: &str) -> String {
        format!("{}queue:{}", self.prefix, queue)
    }

    /// Sibling list of in-flight job IDs pulled from a queue; the source
    /// of truth for crash recovery.
    pub(crate) fn dequeued(&self, queue: &str) -> String {
        format!("{}queue:{}:dequeued", self.prefix, queue)
    }

    /// Hash holding the job record.
    pub(crate) fn job(&self, job_id: &str) -> String {
        format!("{}job:{}", self.prefix, job_id)
    }

    /// Hash holding the current-state snapshot.
    pub(crate) fn job_state(&self, job_id: &str) -> String {
        format!("{}job:{}:state", self.prefix, job_id)
    }

    /// List of serialized state-history entries.
    pub(crate) fn job_history(&self, job_id: &str) -> String {
        format!("{}job:{}:history", self.prefix, job_id)
    }

    /// Hash with a server's registration data and heartbeat.
    pub(crate) fn server(&self, server_id: &str) -> String {
        format!("{}server:{}", self.prefix, server_id)
    }

    /// List of queues a server serves.
    pub(crate) fn server_queues(&self, server_id: &str) -> String {
        format!("{}server:{}:queues", self.prefix, server_id)
    }
}
