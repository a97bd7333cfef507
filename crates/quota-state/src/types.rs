//! Domain types held in a `SchedulerState`.

use std::collections::BTreeSet;

use quota_core::{AccountId, Priority, PriorityVector, RequestId, Timestamp, WorkerId};
use serde::{Deserialize, Serialize};

/// A unit of work, either pending or running on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: RequestId,
    /// Account charged for this request. Accountless requests only ever
    /// run in the free tier.
    pub account_id: Option<AccountId>,
    pub enqueue_time: Timestamp,
    /// Labels a worker must carry to run this request.
    #[serde(default)]
    pub base_labels: BTreeSet<String>,
    /// Labels a worker should carry; a worker without them can still run
    /// the request after provisioning.
    #[serde(default)]
    pub provisionable_labels: BTreeSet<String>,
    /// Latest time this request's state was confirmed by the fleet.
    #[serde(default)]
    pub confirmed_time: Timestamp,
}

impl TaskRequest {
    pub fn new(id: impl Into<RequestId>, account_id: Option<&str>, enqueue_time: Timestamp) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.map(str::to_string),
            enqueue_time,
            base_labels: BTreeSet::new(),
            provisionable_labels: BTreeSet::new(),
            confirmed_time: enqueue_time,
        }
    }

    pub fn with_base_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provisionable_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provisionable_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn confirm(&mut self, t: Timestamp) {
        self.confirmed_time = self.confirmed_time.max(t);
    }
}

/// A request actively executing on a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub request: TaskRequest,
    /// Tier the task is currently charged at.
    pub priority: Priority,
    /// Quota consumed so far, per tier.
    pub cost: PriorityVector,
}

impl TaskRun {
    pub fn request_id(&self) -> &str {
        &self.request.id
    }

    pub fn account_id(&self) -> Option<&str> {
        self.request.account_id.as_deref()
    }
}

/// An execution slot, idle or running exactly one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub run: Option<TaskRun>,
    /// Latest time the fleet confirmed this worker's state.
    #[serde(default)]
    pub confirmed_time: Timestamp,
}

impl Worker {
    pub fn new(id: impl Into<WorkerId>, labels: BTreeSet<String>, confirmed_time: Timestamp) -> Self {
        Self {
            id: id.into(),
            labels,
            run: None,
            confirmed_time,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.run.is_none()
    }

    /// Latest confirmation of either the worker or the task it runs.
    pub fn latest_confirmed_time(&self) -> Timestamp {
        match &self.run {
            Some(run) => self.confirmed_time.max(run.request.confirmed_time),
            None => self.confirmed_time,
        }
    }

    pub(crate) fn confirm(&mut self, t: Timestamp) {
        self.confirmed_time = self.confirmed_time.max(t);
    }
}
