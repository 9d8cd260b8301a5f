use std::time::Duration;

use chrono::Utc;
use deadpool_redis::redis;

use crate::error::CinderError;
use crate::job::{StateData, StateHistoryEntry, fields, format_timestamp};
use crate::storage::Storage;

/// A pipelined batch of Redis writes, committed in a single round trip.
///
/// Nothing is observable until [`commit`](Self::commit); dropping the
/// value discards every queued operation, and because `commit` consumes
/// the transaction it cannot run twice. Keys are logical names — the
/// configured prefix is applied here.
///
/// Builder methods are infallible so operations can be chained; an empty
/// key or value is remembered and surfaced as
/// [`CinderError::InvalidArgument`] by `commit`.
pub struct WriteTransaction<'a> {
    storage: &'a Storage,
    pipe: redis::Pipeline,
    failed: Option<CinderError>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self {
            storage,
            pipe,
            failed: None,
        }
    }

    fn fail(&mut self, error: CinderError) {
        if self.failed.is_none() {
            self.failed = Some(error);
        }
    }

    fn require(&mut self, value: &str, what: &str) -> bool {
        if value.is_empty() {
            self.fail(CinderError::InvalidArgument(format!("{what} is empty")));
            return false;
        }
        true
    }

    // --- job lifecycle ---

    /// Sets one TTL on the job hash and its `:state` and `:history`
    /// siblings, making the job transient.
    pub fn expire_job(&mut self, job_id: &str, expire_in: Duration) -> &mut Self {
        if !self.require(job_id, "job id") {
            return self;
        }
        let keys = self.storage.keys();
        let ttl = expire_in.as_secs() as i64;
        self.pipe.expire(keys.job(job_id), ttl).ignore();
        self.pipe.expire(keys.job_history(job_id), ttl).ignore();
        self.pipe.expire(keys.job_state(job_id), ttl).ignore();
        self
    }

    /// Removes the TTL from the job hash and its siblings.
    pub fn persist_job(&mut self, job_id: &str) -> &mut Self {
        if !self.require(job_id, "job id") {
            return self;
        }
        let keys = self.storage.keys();
        self.pipe.persist(keys.job(job_id)).ignore();
        self.pipe.persist(keys.job_history(job_id)).ignore();
        self.pipe.persist(keys.job_state(job_id)).ignore();
        self
    }

    /// Rewrites the current-state snapshot: sets the `State` field on the
    /// job hash, replaces the `:state` hash with the new state's name,
    /// reason and payload, and appends a history entry.
    pub fn set_job_state(&mut self, job_id: &str, state: &StateData) -> &mut Self {
        if !self.require(job_id, "job id") || !self.require(&state.name, "state name") {
            return self;
        }
        let keys = self.storage.keys();
        self.pipe
            .hset(keys.job(job_id), fields::STATE, &state.name)
            .ignore();
        self.pipe.del(keys.job_state(job_id)).ignore();

        let mut pairs: Vec<(String, String)> = Vec::with_capacity(state.data.len() + 2);
        pairs.push((fields::STATE.to_string(), state.name.clone()));
        if let Some(reason) = &state.reason {
            pairs.push((fields::REASON.to_string(), reason.clone()));
        }
        for (name, value) in &state.data {
            pairs.push((name.clone(), value.clone()));
        }
        self.pipe
            .hset_multiple(keys.job_state(job_id), &pairs)
            .ignore();

        self.add_job_state(job_id, state)
    }

    /// Appends a history entry without touching the snapshot.
    pub fn add_job_state(&mut self, job_id: &str, state: &StateData) -> &mut Self {
        if !self.require(job_id, "job id") || !self.require(&state.name, "state name") {
            return self;
        }
        let entry = StateHistoryEntry {
            state: state.name.clone(),
            reason: state.reason.clone(),
            created_at: format_timestamp(Utc::now()),
            data: state.data.clone(),
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                let history = self.storage.keys().job_history(job_id);
                self.pipe.rpush(history, json).ignore();
            }
            Err(error) => self.fail(error.into()),
        }
        self
    }

    // --- queues ---

    /// Registers the queue, pushes the job ID onto it (to the consumption
    /// end for LIFO queues), and wakes one blocked fetcher.
    pub fn add_to_queue(&mut self, queue: &str, job_id: &str) -> &mut Self {
        if !self.require(queue, "queue") || !self.require(job_id, "job id") {
            return self;
        }
        let keys = self.storage.keys();
        self.pipe.sadd(&keys.queues, queue).ignore();
        if self.storage.config().lifo_queues.contains(queue) {
            self.pipe.rpush(keys.queue(queue), job_id).ignore();
        } else {
            self.pipe.lpush(keys.queue(queue), job_id).ignore();
        }
        self.pipe
            .cmd("PUBLISH")
            .arg(&keys.fetch_channel)
            .arg(job_id)
            .ignore();
        self
    }

    // --- counters ---

    pub fn increment_counter(&mut self, key: &str, expire_in: Option<Duration>) -> &mut Self {
        self.adjust_counter(key, 1, expire_in)
    }

    pub fn decrement_counter(&mut self, key: &str, expire_in: Option<Duration>) -> &mut Self {
        self.adjust_counter(key, -1, expire_in)
    }

    fn adjust_counter(&mut self, key: &str, delta: i64, expire_in: Option<Duration>) -> &mut Self {
        if !self.require(key, "counter key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.incr(&full_key, delta).ignore();
        if let Some(expire_in) = expire_in {
            self.pipe
                .expire(&full_key, expire_in.as_secs() as i64)
                .ignore();
        }
        self
    }

    // --- sorted sets ---

    /// Adds `value` with score 0.
    pub fn add_to_set(&mut self, key: &str, value: &str) -> &mut Self {
        self.add_to_set_scored(key, value, 0.0)
    }

    pub fn add_to_set_scored(&mut self, key: &str, value: &str, score: f64) -> &mut Self {
        if !self.require(key, "set key") || !self.require(value, "set value") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.zadd(full_key, value, score).ignore();
        self
    }

    /// Adds every value with score 0.
    pub fn add_range_to_set(&mut self, key: &str, values: &[String]) -> &mut Self {
        if !self.require(key, "set key") {
            return self;
        }
        if values.is_empty() {
            return self;
        }
        let items: Vec<(f64, &str)> = values.iter().map(|value| (0.0, value.as_str())).collect();
        let full_key = self.storage.keys().key(key);
        self.pipe.zadd_multiple(full_key, &items).ignore();
        self
    }

    pub fn remove_from_set(&mut self, key: &str, value: &str) -> &mut Self {
        if !self.require(key, "set key") || !self.require(value, "set value") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.zrem(full_key, value).ignore();
        self
    }

    pub fn remove_set(&mut self, key: &str) -> &mut Self {
        if !self.require(key, "set key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.del(full_key).ignore();
        self
    }

    // --- lists ---

    /// Pushes to the head of the list.
    pub fn insert_to_list(&mut self, key: &str, value: &str) -> &mut Self {
        if !self.require(key, "list key") || !self.require(value, "list value") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.lpush(full_key, value).ignore();
        self
    }

    /// Removes every occurrence of `value`.
    pub fn remove_from_list(&mut self, key: &str, value: &str) -> &mut Self {
        if !self.require(key, "list key") || !self.require(value, "list value") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.lrem(full_key, 0, value).ignore();
        self
    }

    /// Trims to the inclusive range `[start, end]`.
    pub fn trim_list(&mut self, key: &str, start: isize, end: isize) -> &mut Self {
        if !self.require(key, "list key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.ltrim(full_key, start, end).ignore();
        self
    }

    // --- hashes ---

    pub fn set_range_in_hash<I, K, V>(&mut self, key: &str, pairs: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if !self.require(key, "hash key") {
            return self;
        }
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        if pairs.is_empty() {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.hset_multiple(full_key, &pairs).ignore();
        self
    }

    pub fn remove_hash(&mut self, key: &str) -> &mut Self {
        if !self.require(key, "hash key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.del(full_key).ignore();
        self
    }

    // --- ttl management ---

    pub fn expire_hash(&mut self, key: &str, expire_in: Duration) -> &mut Self {
        self.expire_key(key, expire_in)
    }

    pub fn expire_list(&mut self, key: &str, expire_in: Duration) -> &mut Self {
        self.expire_key(key, expire_in)
    }

    pub fn expire_set(&mut self, key: &str, expire_in: Duration) -> &mut Self {
        self.expire_key(key, expire_in)
    }

    pub fn persist_hash(&mut self, key: &str) -> &mut Self {
        self.persist_key(key)
    }

    pub fn persist_list(&mut self, key: &str) -> &mut Self {
        self.persist_key(key)
    }

    pub fn persist_set(&mut self, key: &str) -> &mut Self {
        self.persist_key(key)
    }

    fn expire_key(&mut self, key: &str, expire_in: Duration) -> &mut Self {
        if !self.require(key, "key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe
            .expire(full_key, expire_in.as_secs() as i64)
            .ignore();
        self
    }

    fn persist_key(&mut self, key: &str) -> &mut Self {
        if !self.require(key, "key") {
            return self;
        }
        let full_key = self.storage.keys().key(key);
        self.pipe.persist(full_key).ignore();
        self
    }

    /// Sends the buffered commands as one atomic batch.
    pub async fn commit(self) -> Result<(), CinderError> {
        if let Some(error) = self.failed {
            return Err(error);
        }
        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = self.pipe.query_async(&mut redis).await?;
        Ok(())
    }
}
