use rand::distr::{Alphanumeric, SampleString};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cinder::{Storage, StorageConfig};

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// A unique hash-tagged prefix per test, so a shared Redis instance works.
pub fn test_prefix() -> String {
    format!("{{cinder-test-{}}}:", random_string())
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").expect("REDIS_URL is not set")
}

pub fn setup() -> Storage {
    setup_with_config(StorageConfig::default())
}

pub fn setup_with_config(config: StorageConfig) -> Storage {
    dotenvy::from_filename(".env.test").ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    Storage::builder()
        .url(redis_url())
        .config(config)
        .prefix(test_prefix())
        .build()
        .expect("failed to build storage")
}

/// Raw pool for asserting directly against the wire format.
pub fn redis_pool() -> deadpool_redis::Pool {
    let cfg = deadpool_redis::Config::from_url(redis_url());
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool")
}

/// Enqueues a job ID the way producers do: one committed write transaction.
pub async fn enqueue(storage: &Storage, queue: &str, job_id: &str) {
    let mut tx = storage.create_write_transaction();
    tx.add_to_queue(queue, job_id);
    tx.commit().await.expect("enqueue failed");
}
