use rand::distr::{Alphanumeric, SampleString};

use crate::error::CinderError;
use crate::storage::Storage;

pub fn random_string() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 16)
}

/// A unique hash-tagged prefix so every test gets its own key space.
pub fn test_prefix() -> String {
    format!("{{cinder-test-{}}}:", random_string())
}

pub fn test_storage() -> Result<Storage, CinderError> {
    dotenvy::from_filename(".env.test").ok();
    let url = std::env::var("REDIS_URL").expect("REDIS_URL is not set");
    Storage::builder().url(url).prefix(test_prefix()).build()
}
