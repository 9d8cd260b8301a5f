use deadpool_redis::redis::{self, IntoConnectionInfo};

use crate::config::StorageConfig;
use crate::error::CinderError;
use crate::storage::Storage;

/// Builds a [`Storage`] from a Redis URL and a [`StorageConfig`].
///
/// ```rust,ignore
/// let storage = cinder::Storage::builder()
///     .from_env()?
///     .prefix("{jobs}:")
///     .build()?;
/// ```
pub struct StorageBuilder {
    url: Option<String>,
    config: StorageConfig,
    pool_size: Option<usize>,
}

impl StorageBuilder {
    pub(crate) fn new() -> Self {
        Self {
            url: None,
            config: StorageConfig::default(),
            pool_size: None,
        }
    }

    /// Reads the Redis URL from the `REDIS_URL` environment variable.
    pub fn from_env(mut self) -> Result<Self, CinderError> {
        let url = std::env::var("REDIS_URL")
            .map_err(|_| CinderError::Config("REDIS_URL is not set".to_string()))?;
        self.url = Some(url);
        Ok(self)
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replaces the whole option set at once.
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.config.db = db;
        self
    }

    pub fn pool_size(mut self, max_size: usize) -> Self {
        self.pool_size = Some(max_size);
        self
    }

    /// Creates the connection pool and the dedicated pub/sub client.
    pub fn build(self) -> Result<Storage, CinderError> {
        let url = self
            .url
            .ok_or_else(|| CinderError::Config("no Redis URL configured".to_string()))?;
        let mut info = url
            .as_str()
            .into_connection_info()
            .map_err(CinderError::Redis)?;
        if self.config.db != 0 {
            info.redis.db = self.config.db;
        }

        let client = redis::Client::open(info.clone())?;

        let mut pool_config = deadpool_redis::Config::from_connection_info(info);
        if let Some(max_size) = self.pool_size {
            pool_config.pool = Some(deadpool_redis::PoolConfig {
                max_size,
                ..Default::default()
            });
        }
        let pool = pool_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

        Ok(Storage::new(pool, client, self.config))
    }
}
