//! quota-state — the scheduler's snapshot of the world.
//!
//! `SchedulerState` holds every worker, every pending request, and every
//! account balance for one pool. It changes only through:
//!
//! - **`Mutation`s** — assign an idle worker, change a running task's
//!   priority, or preempt a running task (cost is refunded to the evicted
//!   account and charged to the preempting one)
//! - **fleet notifications** — `add_request`, `mark_idle`,
//!   `notify_task_running`, `notify_task_absent`, used by the reconciler
//!   to keep the snapshot consistent with the real fleet
//!
//! Violated preconditions panic: they are bugs in the caller, and carrying
//! on would corrupt the fairness accounting.
//!
//! `SnapshotStore` persists post-pass `PoolSnapshot`s in redb, JSON-encoded,
//! keyed by pool id.

pub mod error;
pub mod mutation;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use mutation::Mutation;
pub use snapshot::PoolSnapshot;
pub use state::SchedulerState;
pub use store::SnapshotStore;
pub use types::*;
