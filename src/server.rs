use serde::{Deserialize, Serialize};

/// Field names of the server hash.
pub(crate) mod fields {
    pub const WORKER_COUNT: &str = "WorkerCount";
    pub const STARTED_AT: &str = "StartedAt";
    pub const HEARTBEAT: &str = "Heartbeat";
}

/// Metadata a worker process reports when announcing itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerContext {
    /// Number of worker tasks the process runs.
    pub worker_count: usize,
    /// Queues the process serves, in polling order.
    pub queues: Vec<String>,
}
