use thiserror::Error;

/// Error type for schedule-item enqueueing operations.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The database rejected the insert.
    #[error(transparent)]
    DatabaseError(#[from] sqlx::Error),

    /// `schedule_batch` was called with no recipients.
    #[error("batch contains no items")]
    EmptyBatch,
}
