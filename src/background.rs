use tokio_util::sync::CancellationToken;

use crate::error::CinderError;

/// A long-running component the host process spawns on its own task: the
/// two watchers and the subscription receiver all implement this.
#[async_trait::async_trait]
pub trait BackgroundProcess: Send + Sync {
    /// Runs until the token is cancelled.
    async fn run(&self, token: CancellationToken) -> Result<(), CinderError>;
}
