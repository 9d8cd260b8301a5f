use std::collections::HashSet;
use std::time::Duration;

/// Key prefix applied when none is configured.
///
/// The braces matter: Redis Cluster routes a key by the substring between
/// the first `{` and `}`, so every key written under this prefix lands on
/// one slot and pipelined multi-key transactions stay valid.
pub const DEFAULT_PREFIX: &str = "{hangfire}:";

/// Tuning and layout options for [`Storage`](crate::Storage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Prepended to every Redis key.
    pub prefix: String,
    /// Redis logical database index.
    pub db: i64,
    /// How long a worker may hold a fetched job without acknowledging it
    /// before the recovery watcher hands it to another worker.
    pub invisibility_timeout: Duration,
    /// Upper bound on one blocking wait inside the fetch loop.
    pub fetch_timeout: Duration,
    /// Cadence of the expired-jobs sweep.
    pub expiry_check_interval: Duration,
    /// Capacity of the `succeeded` list.
    pub succeeded_list_size: usize,
    /// Capacity of the `deleted` list.
    pub deleted_list_size: usize,
    /// Queues whose consumers should see the newest job first.
    pub lifo_queues: HashSet<String>,
    /// How long a dequeued job first observed without a `Fetched` flag may
    /// keep its `Checked` mark before being reclaimed.
    pub checked_timeout: Duration,
    /// Expiry of the per-queue recovery lock.
    pub fetched_lock_timeout: Duration,
    /// Pause between recovery passes.
    pub sleep_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            db: 0,
            invisibility_timeout: Duration::from_secs(30 * 60),
            fetch_timeout: Duration::from_secs(3 * 60),
            expiry_check_interval: Duration::from_secs(60 * 60),
            succeeded_list_size: 499,
            deleted_list_size: 499,
            lifo_queues: HashSet::new(),
            checked_timeout: Duration::from_secs(60),
            fetched_lock_timeout: Duration::from_secs(60),
            sleep_timeout: Duration::from_secs(60),
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn invisibility_timeout(mut self, timeout: Duration) -> Self {
        self.invisibility_timeout = timeout;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn expiry_check_interval(mut self, interval: Duration) -> Self {
        self.expiry_check_interval = interval;
        self
    }

    pub fn succeeded_list_size(mut self, size: usize) -> Self {
        self.succeeded_list_size = size;
        self
    }

    pub fn deleted_list_size(mut self, size: usize) -> Self {
        self.deleted_list_size = size;
        self
    }

    /// Marks a queue as LIFO: producers push to the consumption end, so
    /// the newest job is served first.
    pub fn lifo_queue(mut self, queue: impl Into<String>) -> Self {
        self.lifo_queues.insert(queue.into());
        self
    }

    pub fn checked_timeout(mut self, timeout: Duration) -> Self {
        self.checked_timeout = timeout;
        self
    }

    pub fn fetched_lock_timeout(mut self, timeout: Duration) -> Self {
        self.fetched_lock_timeout = timeout;
        self
    }

    pub fn sleep_timeout(mut self, timeout: Duration) -> Self {
        self.sleep_timeout = timeout;
        self
    }
}
