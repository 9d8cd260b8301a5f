use chrono::{DateTime, Utc};

use crate::transaction::WriteTransaction;

/// Well-known lifecycle state names.
pub mod states {
    pub const ENQUEUED: &str = "Enqueued";
    pub const SCHEDULED: &str = "Scheduled";
    pub const PROCESSING: &str = "Processing";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const FAILED: &str = "Failed";
    pub const DELETED: &str = "Deleted";
}

/// What a handler needs to know about the transition being committed.
pub struct StateContext<'a> {
    pub job_id: &'a str,
    /// When the transition was decided; scores time-ordered indices.
    pub transitioned_at: DateTime<Utc>,
}

impl<'a> StateContext<'a> {
    pub fn new(job_id: &'a str) -> Self {
        Self {
            job_id,
            transitioned_at: Utc::now(),
        }
    }
}

/// A per-state hook pair maintaining secondary indices.
///
/// Handlers only queue operations on the supplied transaction and have no
/// side effects of their own; the caller commits them together with the
/// primary state change, so the indices cannot drift from the job hash.
pub trait StateHandler: Send + Sync {
    /// The state name this handler fires on.
    fn state_name(&self) -> &'static str;

    /// Queued when a job enters the state.
    fn apply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>);

    /// Queued when a job leaves the state.
    fn unapply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>);
}

/// Tracks in-flight jobs in the `processing` sorted set, scored by start
/// time.
pub struct ProcessingStateHandler;

impl StateHandler for ProcessingStateHandler {
    fn state_name(&self) -> &'static str {
        states::PROCESSING
    }

    fn apply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.add_to_set_scored(
            "processing",
            context.job_id,
            context.transitioned_at.timestamp() as f64,
        );
    }

    fn unapply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.remove_from_set("processing", context.job_id);
    }
}

/// Tracks failed jobs in the `failed` sorted set, scored by failure time.
pub struct FailedStateHandler;

impl StateHandler for FailedStateHandler {
    fn state_name(&self) -> &'static str {
        states::FAILED
    }

    fn apply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.add_to_set_scored(
            "failed",
            context.job_id,
            context.transitioned_at.timestamp() as f64,
        );
    }

    fn unapply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.remove_from_set("failed", context.job_id);
    }
}

/// Maintains the capped `succeeded` list of recent completions, newest
/// first.
pub struct SucceededStateHandler {
    list_size: usize,
}

impl SucceededStateHandler {
    pub fn new(list_size: usize) -> Self {
        Self { list_size }
    }
}

impl StateHandler for SucceededStateHandler {
    fn state_name(&self) -> &'static str {
        states::SUCCEEDED
    }

    fn apply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.insert_to_list("succeeded", context.job_id);
        transaction.trim_list("succeeded", 0, self.list_size as isize);
    }

    fn unapply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.remove_from_list("succeeded", context.job_id);
    }
}

/// Maintains the capped `deleted` list, newest first.
pub struct DeletedStateHandler {
    list_size: usize,
}

impl DeletedStateHandler {
    pub fn new(list_size: usize) -> Self {
        Self { list_size }
    }
}

impl StateHandler for DeletedStateHandler {
    fn state_name(&self) -> &'static str {
        states::DELETED
    }

    fn apply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.insert_to_list("deleted", context.job_id);
        transaction.trim_list("deleted", 0, self.list_size as isize);
    }

    fn unapply(&self, context: &StateContext<'_>, transaction: &mut WriteTransaction<'_>) {
        transaction.remove_from_list("deleted", context.job_id);
    }
}
