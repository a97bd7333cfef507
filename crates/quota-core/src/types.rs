//! Identifier and time aliases shared across the quota scheduler crates.

/// Unique identifier for a quota account.
pub type AccountId = String;

/// Unique identifier for a worker (an execution slot in the fleet).
pub type WorkerId = String;

/// Unique identifier for a task request.
pub type RequestId = String;

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Seconds elapsed between two timestamps (zero if `to` is before `from`).
pub fn elapsed_secs(from: Timestamp, to: Timestamp) -> f64 {
    to.saturating_sub(from) as f64 / 1000.0
}
