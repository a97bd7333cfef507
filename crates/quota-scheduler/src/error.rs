//! Scheduler error types.

use quota_core::Timestamp;
use thiserror::Error;

/// Recoverable errors returned by `Scheduler` operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("update time {next} is older than the state's time {previous}")]
    UpdateOrder { previous: Timestamp, next: Timestamp },

    #[error("empty request id")]
    EmptyRequestId,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
