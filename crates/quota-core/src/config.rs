//! quota.toml configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::{AccountConfig, SchedulerConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::priority::PriorityVector;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub id: String,
    #[serde(default)]
    pub disable_preemption: bool,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountSpec>,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSpec {
    #[serde(default)]
    pub charge_rate: Vec<f64>,
    pub max_balance: Option<Vec<f64>>,
    pub max_charge_seconds: Option<f64>,
    #[serde(default)]
    pub max_fanout: u32,
    #[serde(default)]
    pub disable_free_tasks: bool,
    #[serde(default)]
    pub initial_balance: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub id: String,
    pub account: Option<String>,
    #[serde(default)]
    pub base_labels: Vec<String>,
    #[serde(default)]
    pub provisionable_labels: Vec<String>,
}

impl QuotaConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(?path, pools = config.pools.len(), "quota config loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: QuotaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for pool in &self.pools {
            if pool.id.is_empty() {
                return Err(ConfigError::EmptyId("pool"));
            }
            if !seen.insert(pool.id.as_str()) {
                return Err(ConfigError::DuplicatePool(pool.id.clone()));
            }
            pool.validate()?;
        }
        Ok(())
    }

    pub fn pool(&self, id: &str) -> Option<&PoolSpec> {
        self.pools.iter().find(|p| p.id == id)
    }
}

impl PoolSpec {
    fn validate(&self) -> ConfigResult<()> {
        for (name, account) in &self.accounts {
            if name.is_empty() {
                return Err(ConfigError::EmptyId("account"));
            }
            account.validate(name)?;
        }
        if self.workers.iter().any(|w| w.id.is_empty()) {
            return Err(ConfigError::EmptyId("worker"));
        }
        if self.requests.iter().any(|r| r.id.is_empty()) {
            return Err(ConfigError::EmptyId("request"));
        }
        Ok(())
    }

    /// Lower the account specs into a `SchedulerConfig`.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            accounts: self
                .accounts
                .iter()
                .map(|(id, spec)| (id.clone(), spec.account_config()))
                .collect(),
            disable_preemption: self.disable_preemption,
        }
    }
}

impl AccountSpec {
    fn validate(&self, account: &str) -> ConfigResult<()> {
        if self.max_balance.is_some() && self.max_charge_seconds.is_some() {
            return Err(ConfigError::ConflictingCap {
                account: account.to_string(),
            });
        }
        let non_finite = |field: &'static str| ConfigError::NonFinite {
            account: account.to_string(),
            field,
        };
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        if !finite(&self.charge_rate) {
            return Err(non_finite("charge_rate"));
        }
        if self.max_balance.as_deref().is_some_and(|max| !finite(max)) {
            return Err(non_finite("max_balance"));
        }
        if !finite(&self.initial_balance) {
            return Err(non_finite("initial_balance"));
        }
        if self.max_charge_seconds.is_some_and(|s| !s.is_finite()) {
            return Err(non_finite("max_charge_seconds"));
        }

        let negative = |field: &'static str| ConfigError::Negative {
            account: account.to_string(),
            field,
        };
        if self.charge_rate.iter().any(|v| *v < 0.0) {
            return Err(negative("charge_rate"));
        }
        if let Some(max) = &self.max_balance {
            if max.iter().any(|v| *v < 0.0) {
                return Err(negative("max_balance"));
            }
        }
        if self.max_charge_seconds.is_some_and(|s| s < 0.0) {
            return Err(negative("max_charge_seconds"));
        }
        Ok(())
    }

    pub fn account_config(&self) -> AccountConfig {
        let rate = PriorityVector::new(&self.charge_rate);
        let config = match (&self.max_balance, self.max_charge_seconds) {
            (Some(max), _) => AccountConfig::new(rate, PriorityVector::new(max)),
            (None, Some(secs)) => AccountConfig::with_max_charge_seconds(rate, secs),
            (None, None) => AccountConfig::new(rate, PriorityVector::zero()),
        };
        let config = config.with_max_fanout(self.max_fanout);
        if self.disable_free_tasks {
            config.with_free_tasks_disabled()
        } else {
            config
        }
    }

    pub fn initial_balance(&self) -> PriorityVector {
        PriorityVector::new(&self.initial_balance)
    }
}
