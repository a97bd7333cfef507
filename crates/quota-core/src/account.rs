//! Quota accounts: recharge configuration and balance arithmetic.
//!
//! An account's balance is a `PriorityVector`. Over time each tier drains
//! by one quota unit per second per task running at that tier, and
//! recharges at the tier's charge rate up to the tier's cap.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::priority::{FREE_BUCKET, NUM_PRIORITIES, Priority, PriorityVector};
use crate::types::AccountId;

/// Balance above which an account's running tasks may be promoted into a tier.
pub const PROMOTE_THRESHOLD: f64 = 5.0;

/// Balance below which an account's running tasks may be demoted out of a tier.
pub const DEMOTE_THRESHOLD: f64 = -5.0;

/// Number of running tasks per paid tier.
pub type JobCounts = [u32; NUM_PRIORITIES];

/// Recharge policy and limits for a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Quota units per second added to each tier.
    pub charge_rate: PriorityVector,
    /// Per-tier cap that recharging never exceeds.
    pub max_balance: PriorityVector,
    /// Maximum concurrently running paid tasks (0 = unlimited).
    #[serde(default)]
    pub max_fanout: u32,
    /// Never run this account's tasks in the free tier.
    #[serde(default)]
    pub disable_free_tasks: bool,
}

impl AccountConfig {
    pub fn new(charge_rate: PriorityVector, max_balance: PriorityVector) -> Self {
        Self {
            charge_rate,
            max_balance,
            max_fanout: 0,
            disable_free_tasks: false,
        }
    }

    /// Cap each tier at `max_charge_seconds` worth of its own charge rate.
    pub fn with_max_charge_seconds(charge_rate: PriorityVector, max_charge_seconds: f64) -> Self {
        let mut max_balance = PriorityVector::zero();
        for tier in 0..NUM_PRIORITIES {
            max_balance[tier] = charge_rate[tier] * max_charge_seconds;
        }
        Self::new(charge_rate, max_balance)
    }

    pub fn with_max_fanout(mut self, max_fanout: u32) -> Self {
        self.max_fanout = max_fanout;
        self
    }

    pub fn with_free_tasks_disabled(mut self) -> Self {
        self.disable_free_tasks = true;
        self
    }
}

/// Per-pool scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub accounts: BTreeMap<AccountId, AccountConfig>,
    #[serde(default)]
    pub disable_preemption: bool,
}

/// Advance `balance` by `elapsed_secs`, given the number of the account's
/// tasks running at each tier.
///
/// Each tier first drains by `elapsed_secs * running`. Only if the drained
/// value is below the cap does it recharge, clamped to the cap. A balance
/// already at or above its cap (e.g. after a preemption refund) is left
/// as-is rather than pulled down.
pub fn next_balance(
    balance: &PriorityVector,
    config: &AccountConfig,
    elapsed_secs: f64,
    running_jobs: &JobCounts,
) -> PriorityVector {
    let mut next = *balance;
    for tier in 0..NUM_PRIORITIES {
        let cap = config.max_balance[tier];
        let mut value = next[tier] - elapsed_secs * f64::from(running_jobs[tier]);
        if value < cap {
            value = (value + elapsed_secs * config.charge_rate[tier]).min(cap);
        }
        next[tier] = value;
    }
    next
}

/// The most important tier the balance can pay for: the first tier with a
/// strictly positive component, or `FREE_BUCKET` if none (or no balance).
pub fn best_priority_for(balance: Option<&PriorityVector>) -> Priority {
    let Some(balance) = balance else {
        return FREE_BUCKET;
    };
    balance
        .iter()
        .position(|value| *value > 0.0)
        .unwrap_or(FREE_BUCKET)
}

/// Whether a tier balance is high enough to promote running tasks into that tier.
pub fn should_promote(tier_balance: f64) -> bool {
    tier_balance > PROMOTE_THRESHOLD
}

/// Whether a tier balance is low enough to demote running tasks out of that tier.
pub fn should_demote(tier_balance: f64) -> bool {
    tier_balance < DEMOTE_THRESHOLD
}
