use std::time::Duration;

use deadpool_redis::redis;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundProcess;
use crate::error::CinderError;

/// Wakes blocked fetchers when a job is enqueued.
///
/// [`run`](BackgroundProcess::run) holds a dedicated pub/sub connection on
/// the fetch channel and sets a one-shot latch on every message; the
/// payload is a wake signal only and is never read. Multiple enqueues may
/// coalesce into a single wake — the fetch loop re-polls every queue on
/// wake anyway.
pub struct FetchSubscription {
    client: redis::Client,
    channel: String,
    latch: Notify,
}

impl FetchSubscription {
    pub(crate) fn new(client: redis::Client, channel: String) -> Self {
        Self {
            client,
            channel,
            latch: Notify::new(),
        }
    }

    /// Blocks until a wake signal, the timeout, or cancellation, whichever
    /// fires first.
    ///
    /// A publish that lands strictly after this call starts is guaranteed
    /// to be observed. One that raced an earlier fetch attempt may be
    /// missed; the timeout poll absorbs that race, making `timeout` the
    /// worst-case fetch latency.
    pub async fn wait_for_job(&self, timeout: Duration, token: &CancellationToken) {
        tokio::select! {
            _ = self.latch.notified() => {}
            _ = tokio::time::sleep(timeout) => {}
            _ = token.cancelled() => {}
        }
    }
}

#[async_trait::async_trait]
impl BackgroundProcess for FetchSubscription {
    async fn run(&self, token: CancellationToken) -> Result<(), CinderError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        tracing::debug!(channel = %self.channel, "subscribed to fetch channel");

        {
            let mut messages = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = messages.next() => match message {
                        Some(_) => self.latch.notify_one(),
                        None => break,
                    },
                }
            }
        }

        pubsub.unsubscribe(&self.channel).await.ok();
        tracing::debug!(channel = %self.channel, "unsubscribed from fetch channel");
        Ok(())
    }
}
