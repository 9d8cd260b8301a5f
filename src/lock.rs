use std::time::{Duration, Instant};

use deadpool_redis::redis;
use uuid::Uuid;

use crate::error::CinderError;

const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Deletes the key only while it still holds our token, so a lock that
/// expired and was re-acquired by another holder is never released by us.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0";

/// A distributed expiring-key lock.
///
/// Held until [`release`](Self::release) or drop. The Redis-side expiry
/// equals the acquisition timeout and bounds how long a crashed holder can
/// block other instances.
pub struct DistributedLock {
    pool: deadpool_redis::Pool,
    key: String,
    token: String,
    released: bool,
}

impl DistributedLock {
    /// Spin-waits on `SET NX PX` until acquired or the deadline passes.
    pub(crate) async fn acquire(
        pool: deadpool_redis::Pool,
        key: String,
        timeout: Duration,
    ) -> Result<Self, CinderError> {
        let token = Uuid::new_v4().simple().to_string();
        let deadline = Instant::now() + timeout;
        let mut redis = pool.get().await?;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(timeout.as_millis() as u64)
                .query_async(&mut redis)
                .await?;

            if acquired.is_some() {
                drop(redis);
                return Ok(Self {
                    pool,
                    key,
                    token,
                    released: false,
                });
            }

            if Instant::now() + ACQUIRE_RETRY_INTERVAL >= deadline {
                return Err(CinderError::LockTimeout {
                    resource: key,
                    timeout,
                });
            }

            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    /// The fully prefixed Redis key the lock lives under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock if we still hold it.
    pub async fn release(mut self) -> Result<(), CinderError> {
        self.released = true;
        Self::delete(&self.pool, &self.key, &self.token).await
    }

    async fn delete(
        pool: &deadpool_redis::Pool,
        key: &str,
        token: &str,
    ) -> Result<(), CinderError> {
        let mut redis = pool.get().await?;
        let _: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut redis)
            .await?;
        Ok(())
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let pool = self.pool.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = Self::delete(&pool, &key, &token).await {
                    tracing::warn!(key, %err, "failed to release dropped lock");
                }
            });
        }
        // Without a runtime the key expires on its own.
    }
}
