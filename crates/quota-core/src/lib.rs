//! quota-core — leaf types for the quota scheduler.
//!
//! - **`priority`** — fixed-arity per-tier vectors (`PriorityVector`) and
//!   the `FREE_BUCKET` sentinel tier
//! - **`account`** — account recharge config, balance advancement, and
//!   best-affordable-priority selection
//! - **`config`** — TOML pool configuration (`quota.toml`)
//! - **`types`** — identifier and timestamp aliases shared by every crate

pub mod account;
pub mod config;
pub mod error;
pub mod priority;
pub mod types;

pub use account::{
    AccountConfig, DEMOTE_THRESHOLD, JobCounts, PROMOTE_THRESHOLD, SchedulerConfig,
    best_priority_for, next_balance, should_demote, should_promote,
};
pub use config::{AccountSpec, PoolSpec, QuotaConfig, RequestSpec, WorkerSpec};
pub use error::{ConfigError, ConfigResult};
pub use priority::{FREE_BUCKET, NUM_PRIORITIES, Priority, PriorityVector};
pub use types::*;
