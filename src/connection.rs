use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_redis::redis::{self, AsyncCommands};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::CinderError;
use crate::fetched_job::FetchedJob;
use crate::job::{JobData, JobInvocation, StateData, fields, format_timestamp, parse_timestamp};
use crate::lock::DistributedLock;
use crate::server::{ServerContext, fields as server_fields};
use crate::storage::Storage;
use crate::transaction::WriteTransaction;

/// The per-worker storage handle.
///
/// Creates jobs, fetches the next job across a list of queues, reads job
/// and state data, and manages server registration. Cheap to create and
/// clone; every call checks a connection out of the shared pool.
#[derive(Clone)]
pub struct Connection {
    storage: Storage,
}

impl Connection {
    pub(crate) fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Starts a write transaction against the same storage.
    pub fn create_write_transaction(&self) -> WriteTransaction<'_> {
        self.storage.create_write_transaction()
    }

    /// Writes a new job hash holding the serialized invocation and the
    /// caller's parameters, under a TTL so a job that is never enqueued
    /// cleans itself up. Returns the fresh 32-hex-character job ID.
    pub async fn create_expired_job(
        &self,
        invocation: &JobInvocation,
        parameters: &HashMap<String, String>,
        created_at: DateTime<Utc>,
        expire_in: Duration,
    ) -> Result<String, CinderError> {
        let job_id = Uuid::new_v4().simple().to_string();
        let keys = self.storage.keys();

        // Parameters first: the invocation fields win on a name collision.
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(parameters.len() + 5);
        for (name, value) in parameters {
            pairs.push((name.clone(), value.clone()));
        }
        pairs.push((fields::TYPE.to_string(), invocation.type_name.clone()));
        pairs.push((fields::METHOD.to_string(), invocation.method.clone()));
        pairs.push((
            fields::PARAMETER_TYPES.to_string(),
            invocation.parameter_types.clone(),
        ));
        pairs.push((fields::ARGUMENTS.to_string(), invocation.arguments.clone()));
        pairs.push((fields::CREATED_AT.to_string(), format_timestamp(created_at)));

        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(keys.job(&job_id), &pairs)
            .expire(keys.job(&job_id), expire_in.as_secs() as i64)
            .query_async(&mut redis)
            .await?;

        tracing::debug!(job_id, "created job record");
        Ok(job_id)
    }

    /// Acquires an expiring distributed lock on the prefixed resource
    /// name, spin-waiting up to `timeout`. The handle releases on drop.
    pub async fn acquire_distributed_lock(
        &self,
        resource: &str,
        timeout: Duration,
    ) -> Result<DistributedLock, CinderError> {
        if resource.is_empty() {
            return Err(CinderError::InvalidArgument("resource is empty".to_string()));
        }
        DistributedLock::acquire(
            self.storage.pool().clone(),
            self.storage.keys().key(resource),
            timeout,
        )
        .await
    }

    /// Moves the next pending job into its queue's dequeue list and
    /// returns a scoped handle for it.
    ///
    /// Queues are polled in the order given. When all are empty the call
    /// blocks on the fetch channel for up to the configured fetch timeout
    /// and retries, so it returns only with a job or with
    /// [`CinderError::Cancelled`].
    pub async fn fetch_next_job(
        &self,
        queues: &[String],
        token: &CancellationToken,
    ) -> Result<FetchedJob, CinderError> {
        if queues.is_empty() {
            return Err(CinderError::InvalidArgument("queues is empty".to_string()));
        }
        let keys = self.storage.keys();

        loop {
            if token.is_cancelled() {
                return Err(CinderError::Cancelled);
            }

            let mut redis = self.storage.get_pooled_connection().await?;
            for queue in queues {
                let job_id: Option<String> = redis
                    .lmove(
                        keys.queue(queue),
                        keys.dequeued(queue),
                        redis::Direction::Right,
                        redis::Direction::Left,
                    )
                    .await?;
                if let Some(job_id) = job_id {
                    let _: () = redis
                        .hset(
                            keys.job(&job_id),
                            fields::FETCHED,
                            format_timestamp(Utc::now()),
                        )
                        .await?;
                    tracing::debug!(job_id, queue, "fetched job");
                    return Ok(FetchedJob::new(
                        self.storage.clone(),
                        job_id,
                        queue.clone(),
                    ));
                }
            }
            drop(redis);

            self.storage
                .subscription()
                .wait_for_job(self.storage.config().fetch_timeout, token)
                .await;
        }
    }

    // --- job data ---

    /// Reads the job hash; `None` when the job does not exist. A job whose
    /// invocation fields are missing comes back with `load_error` set
    /// instead of failing, so the caller can surface it in a failed-state
    /// entry without interrupting its fetch loop.
    pub async fn get_job_data(&self, job_id: &str) -> Result<Option<JobData>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let mut hash: HashMap<String, String> =
            redis.hgetall(self.storage.keys().job(job_id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }

        let state = hash.remove(fields::STATE);
        let created_at = hash
            .remove(fields::CREATED_AT)
            .as_deref()
            .and_then(parse_timestamp);
        let type_name = hash.remove(fields::TYPE);
        let method = hash.remove(fields::METHOD);
        let parameter_types = hash.remove(fields::PARAMETER_TYPES);
        let arguments = hash.remove(fields::ARGUMENTS);

        let (invocation, load_error) = match (type_name, method) {
            (Some(type_name), Some(method)) => (
                Some(JobInvocation {
                    type_name,
                    method,
                    parameter_types: parameter_types.unwrap_or_default(),
                    arguments: arguments.unwrap_or_default(),
                }),
                None,
            ),
            _ => (
                None,
                Some("job record is missing its invocation fields".to_string()),
            ),
        };

        Ok(Some(JobData {
            invocation,
            state,
            created_at,
            load_error,
        }))
    }

    /// Reads the current-state snapshot; `None` when absent.
    pub async fn get_state_data(&self, job_id: &str) -> Result<Option<StateData>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let mut hash: HashMap<String, String> = redis
            .hgetall(self.storage.keys().job_state(job_id))
            .await?;
        if hash.is_empty() {
            return Ok(None);
        }
        let name = hash.remove(fields::STATE).unwrap_or_default();
        let reason = hash.remove(fields::REASON);
        Ok(Some(StateData {
            name,
            reason,
            data: hash,
        }))
    }

    pub async fn set_job_parameter(
        &self,
        job_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), CinderError> {
        if name.is_empty() {
            return Err(CinderError::InvalidArgument(
                "parameter name is empty".to_string(),
            ));
        }
        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = redis
            .hset(self.storage.keys().job(job_id), name, value)
            .await?;
        Ok(())
    }

    /// `None` when the job or the parameter is absent.
    pub async fn get_job_parameter(
        &self,
        job_id: &str,
        name: &str,
    ) -> Result<Option<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let value: Option<String> = redis.hget(self.storage.keys().job(job_id), name).await?;
        Ok(value)
    }

    // --- server registry ---

    /// Registers a server and its queue list. Announcing the same ID again
    /// overwrites the previous registration.
    pub async fn announce_server(
        &self,
        server_id: &str,
        context: &ServerContext,
    ) -> Result<(), CinderError> {
        if server_id.is_empty() {
            return Err(CinderError::InvalidArgument(
                "server id is empty".to_string(),
            ));
        }
        let keys = self.storage.keys();
        let mut redis = self.storage.get_pooled_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.sadd(&keys.servers, server_id).ignore();
        pipe.hset_multiple(
            keys.server(server_id),
            &[
                (
                    server_fields::WORKER_COUNT,
                    context.worker_count.to_string(),
                ),
                (server_fields::STARTED_AT, format_timestamp(Utc::now())),
            ],
        )
        .ignore();
        pipe.del(keys.server_queues(server_id)).ignore();
        if !context.queues.is_empty() {
            pipe.rpush(keys.server_queues(server_id), &context.queues)
                .ignore();
        }
        let _: () = pipe.query_async(&mut redis).await?;

        tracing::info!(server_id, "announced server");
        Ok(())
    }

    /// Records that the server is alive.
    pub async fn heartbeat(&self, server_id: &str) -> Result<(), CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = redis
            .hset(
                self.storage.keys().server(server_id),
                server_fields::HEARTBEAT,
                format_timestamp(Utc::now()),
            )
            .await?;
        Ok(())
    }

    /// Removes a server from the registry together with its queue list.
    pub async fn remove_server(&self, server_id: &str) -> Result<(), CinderError> {
        let keys = self.storage.keys();
        let mut redis = self.storage.get_pooled_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .srem(&keys.servers, server_id)
            .del(keys.server(server_id))
            .del(keys.server_queues(server_id))
            .query_async(&mut redis)
            .await?;
        tracing::info!(server_id, "removed server");
        Ok(())
    }

    /// Removes every server not seen for longer than `timeout`, where
    /// "seen" is the later of `StartedAt` and `Heartbeat`. Returns how
    /// many were removed.
    pub async fn remove_timed_out_servers(&self, timeout: Duration) -> Result<usize, CinderError> {
        let cutoff = chrono::Duration::from_std(timeout)
            .map_err(|_| CinderError::InvalidArgument("timeout is out of range".to_string()))?;
        let keys = self.storage.keys();
        let mut redis = self.storage.get_pooled_connection().await?;
        let server_ids: Vec<String> = redis.smembers(&keys.servers).await?;
        let now = Utc::now();
        let mut removed = 0;

        for server_id in server_ids {
            let mut cmd = redis::cmd("HMGET");
            cmd.arg(keys.server(&server_id))
                .arg(server_fields::STARTED_AT)
                .arg(server_fields::HEARTBEAT);
            let values: Vec<Option<String>> = cmd.query_async(&mut redis).await?;

            let started_at = values
                .first()
                .and_then(|value| value.as_deref())
                .and_then(parse_timestamp);
            let heartbeat = values
                .get(1)
                .and_then(|value| value.as_deref())
                .and_then(parse_timestamp);

            let last_seen = match (started_at, heartbeat) {
                (Some(started), Some(beat)) => Some(started.max(beat)),
                (Some(started), None) => Some(started),
                (None, beat) => beat,
            };

            // A registered ID without a server hash is stale too.
            let timed_out = last_seen.is_none_or(|seen| now.signed_duration_since(seen) > cutoff);
            if timed_out {
                self.remove_server(&server_id).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    // --- read helpers ---

    /// All fields of a hash; empty map when the key is absent.
    pub async fn get_all_entries_from_hash(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let entries: HashMap<String, String> =
            redis.hgetall(self.storage.keys().key(key)).await?;
        Ok(entries)
    }

    /// The whole list, head to tail; empty when the key is absent.
    pub async fn get_all_items_from_list(&self, key: &str) -> Result<Vec<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let items: Vec<String> = redis.lrange(self.storage.keys().key(key), 0, -1).await?;
        Ok(items)
    }

    /// Every member of a sorted set ordered by score; empty when absent.
    pub async fn get_all_items_from_set(&self, key: &str) -> Result<Vec<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let items: Vec<String> = redis.zrange(self.storage.keys().key(key), 0, -1).await?;
        Ok(items)
    }

    /// Counter value; 0 when the key is absent.
    pub async fn get_counter(&self, key: &str) -> Result<i64, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let value: Option<i64> = redis.get(self.storage.keys().key(key)).await?;
        Ok(value.unwrap_or(0))
    }

    /// The lowest-scored member with a score in `[from_score, to_score]`;
    /// `None` when the range is empty.
    pub async fn get_first_by_lowest_score_from_set(
        &self,
        key: &str,
        from_score: f64,
        to_score: f64,
    ) -> Result<Option<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let mut members: Vec<String> = redis
            .zrangebyscore_limit(self.storage.keys().key(key), from_score, to_score, 0, 1)
            .await?;
        Ok(members.pop())
    }

    pub async fn get_hash_count(&self, key: &str) -> Result<usize, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let count: i64 = redis.hlen(self.storage.keys().key(key)).await?;
        Ok(count as usize)
    }

    pub async fn get_list_count(&self, key: &str) -> Result<usize, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let count: i64 = redis.llen(self.storage.keys().key(key)).await?;
        Ok(count as usize)
    }

    pub async fn get_set_count(&self, key: &str) -> Result<usize, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let count: i64 = redis.zcard(self.storage.keys().key(key)).await?;
        Ok(count as usize)
    }

    /// Remaining TTL of a hash; `None` when the key is absent or persistent.
    pub async fn get_hash_ttl(&self, key: &str) -> Result<Option<Duration>, CinderError> {
        self.key_ttl(key).await
    }

    /// Remaining TTL of a list; `None` when the key is absent or persistent.
    pub async fn get_list_ttl(&self, key: &str) -> Result<Option<Duration>, CinderError> {
        self.key_ttl(key).await
    }

    /// Remaining TTL of a sorted set; `None` when absent or persistent.
    pub async fn get_set_ttl(&self, key: &str) -> Result<Option<Duration>, CinderError> {
        self.key_ttl(key).await
    }

    /// Inclusive index range of a list.
    pub async fn get_range_from_list(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let items: Vec<String> = redis
            .lrange(self.storage.keys().key(key), start, end)
            .await?;
        Ok(items)
    }

    /// Inclusive rank range of a sorted set.
    pub async fn get_range_from_set(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let items: Vec<String> = redis
            .zrange(self.storage.keys().key(key), start, end)
            .await?;
        Ok(items)
    }

    /// `None` when the hash or the field is absent.
    pub async fn get_value_from_hash(
        &self,
        key: &str,
        field: &str,
    ) -> Result<Option<String>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let value: Option<String> = redis.hget(self.storage.keys().key(key), field).await?;
        Ok(value)
    }

    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, CinderError> {
        let mut redis = self.storage.get_pooled_connection().await?;
        let ttl: i64 = redis.ttl(self.storage.keys().key(key)).await?;
        if ttl > 0 {
            Ok(Some(Duration::from_secs(ttl as u64)))
        } else {
            Ok(None)
        }
    }
}
