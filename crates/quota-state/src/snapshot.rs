use quota_core::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::state::SchedulerState;

/// Everything needed to resume scheduling a pool: its configuration and
/// its state as of the last completed pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub config: SchedulerConfig,
    pub state: SchedulerState,
}

impl PoolSnapshot {
    pub fn new(pool_id: impl Into<String>, config: SchedulerConfig, state: SchedulerState) -> Self {
        Self {
            pool_id: pool_id.into(),
            config,
            state,
        }
    }

    pub fn table_key(&self) -> &str {
        &self.pool_id
    }
}
