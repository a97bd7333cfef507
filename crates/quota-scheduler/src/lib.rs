//! quota-scheduler — quota-based preemptible fair-share scheduling.
//!
//! A `Scheduler` owns one pool's `SchedulerConfig` and `SchedulerState`.
//! The driver calls it in a fixed rhythm:
//!
//! - **`update_time`** — charge running tasks for elapsed time and
//!   advance every configured account's balance
//! - **`run_once`** — one scheduling pass, returning the mutations it
//!   applied (assignments, priority changes, preemptions)
//!
//! Between passes the reconciler feeds fleet notifications through the
//! same `Scheduler`.
//!
//! # Pass structure
//!
//! ```text
//! for p in 0..NUM_PRIORITIES
//!   ├── idle matching (provisionable labels satisfied)
//!   ├── idle matching (base labels only)
//!   ├── demote out of / promote into p
//!   ├── preempt tasks running below p
//!   └── throttled requests fall through to FREE_BUCKET
//! FREE_BUCKET
//!   └── idle matching only
//! ```

pub mod error;
pub mod matching;
mod pass;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use matching::{MatchMode, match_quality};
pub use scheduler::Scheduler;
