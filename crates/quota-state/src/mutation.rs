//! Mutations — the only sanctioned scheduling transitions of a `SchedulerState`.
//!
//! Preconditions are the caller's responsibility. A violated one panics
//! with the offending worker/request ids.

use std::collections::BTreeMap;

use quota_core::{AccountId, Priority, PriorityVector, RequestId, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state::SchedulerState;
use crate::types::TaskRun;

/// A scheduling decision applied to a `SchedulerState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Start a pending request on an idle worker.
    AssignIdleWorker {
        worker_id: WorkerId,
        request_id: RequestId,
        priority: Priority,
    },
    /// Re-tier the task running on a worker.
    ChangePriority {
        worker_id: WorkerId,
        priority: Priority,
    },
    /// Evict `task_to_abort` from a worker and start a pending request in its place.
    PreemptTask {
        worker_id: WorkerId,
        request_id: RequestId,
        task_to_abort: RequestId,
        priority: Priority,
    },
}

impl Mutation {
    pub fn worker_id(&self) -> &str {
        match self {
            Self::AssignIdleWorker { worker_id, .. }
            | Self::ChangePriority { worker_id, .. }
            | Self::PreemptTask { worker_id, .. } => worker_id,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Self::AssignIdleWorker { priority, .. }
            | Self::ChangePriority { priority, .. }
            | Self::PreemptTask { priority, .. } => *priority,
        }
    }

    /// Whether the driver has to act on the real fleet (dispatch or kill).
    /// Priority changes are bookkeeping only.
    pub fn requires_dispatch(&self) -> bool {
        !matches!(self, Self::ChangePriority { .. })
    }
}

impl SchedulerState {
    /// Apply a mutation.
    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::AssignIdleWorker {
                worker_id,
                request_id,
                priority,
            } => self.assign_idle_worker(worker_id, request_id, *priority),
            Mutation::ChangePriority {
                worker_id,
                priority,
            } => self.change_priority(worker_id, *priority),
            Mutation::PreemptTask {
                worker_id,
                request_id,
                task_to_abort,
                priority,
            } => {
                let running = self
                    .workers
                    .get(worker_id)
                    .and_then(|w| w.run.as_ref())
                    .map(|r| r.request_id());
                if running != Some(task_to_abort.as_str()) {
                    panic!(
                        "worker {worker_id} is running {running:?}, expected {task_to_abort}"
                    );
                }
                self.preempt_task(worker_id, request_id, *priority);
            }
        }
    }

    /// Start pending `request_id` on idle `worker_id` at `priority`, with zero cost.
    ///
    /// Panics if the worker is unknown or busy, or the request is not pending.
    pub fn assign_idle_worker(&mut self, worker_id: &str, request_id: &str, priority: Priority) {
        let worker = self
            .workers
            .get_mut(worker_id)
            .unwrap_or_else(|| panic!("no worker with id {worker_id}"));
        if let Some(run) = &worker.run {
            panic!(
                "worker {worker_id} is not idle, it is running {}",
                run.request_id()
            );
        }
        let request = self
            .requests
            .shift_remove(request_id)
            .unwrap_or_else(|| panic!("no pending request with id {request_id}"));

        debug!(worker = %worker_id, request = %request_id, priority, "assigned idle worker");
        worker.run = Some(TaskRun {
            request,
            priority,
            cost: PriorityVector::zero(),
        });
    }

    /// Re-tier the task running on `worker_id`. Cost and assignment are untouched.
    ///
    /// Panics if the worker is unknown or idle.
    pub fn change_priority(&mut self, worker_id: &str, priority: Priority) {
        let run = self
            .workers
            .get_mut(worker_id)
            .unwrap_or_else(|| panic!("no worker with id {worker_id}"))
            .run
            .as_mut()
            .unwrap_or_else(|| panic!("worker {worker_id} is idle, cannot change priority"));

        debug!(
            worker = %worker_id,
            request = %run.request.id,
            from = run.priority,
            to = priority,
            "reprioritized running task"
        );
        run.priority = priority;
    }

    /// Replace the task running on `worker_id` with pending `request_id`.
    ///
    /// The incumbent's accrued cost is refunded to its account and charged
    /// to the challenger's account; the challenger's run starts from that
    /// cost. The incumbent request goes back to the pending set. A side
    /// whose account has no balance entry is neither refunded nor charged.
    ///
    /// Panics if the worker is unknown or idle, or the request is not pending.
    pub fn preempt_task(&mut self, worker_id: &str, request_id: &str, priority: Priority) {
        if !self.requests.contains_key(request_id) {
            panic!("no pending request with id {request_id}");
        }
        let worker = self
            .workers
            .get_mut(worker_id)
            .unwrap_or_else(|| panic!("no worker with id {worker_id}"));
        let incumbent = worker
            .run
            .take()
            .unwrap_or_else(|| panic!("worker {worker_id} is idle, nothing to preempt"));

        let cost = incumbent.cost;
        let challenger = self
            .requests
            .shift_remove(request_id)
            .unwrap_or_else(|| panic!("no pending request with id {request_id}"));

        refund(&mut self.balances, incumbent.account_id(), cost);
        charge(&mut self.balances, challenger.account_id.as_deref(), cost);

        info!(
            worker = %worker_id,
            request = %request_id,
            preempted = %incumbent.request.id,
            from_priority = incumbent.priority,
            priority,
            ?cost,
            "preempted running task"
        );

        worker.run = Some(TaskRun {
            request: challenger,
            priority,
            cost,
        });
        self.requests
            .insert(incumbent.request.id.clone(), incumbent.request);
    }
}

fn refund(balances: &mut BTreeMap<AccountId, PriorityVector>, account: Option<&str>, cost: PriorityVector) {
    if let Some(balance) = account.and_then(|a| balances.get_mut(a)) {
        *balance += cost;
    }
}

fn charge(balances: &mut BTreeMap<AccountId, PriorityVector>, account: Option<&str>, cost: PriorityVector) {
    if let Some(balance) = account.and_then(|a| balances.get_mut(a)) {
        *balance -= cost;
    }
}
