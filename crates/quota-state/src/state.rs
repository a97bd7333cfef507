//! SchedulerState — workers, pending requests, and balances for one pool.
//!
//! Besides the mutations in `crate::mutation`, the state accepts fleet
//! notifications from the reconciler. Each notification carries the time
//! the fleet observed it; anything older than what the state already
//! knows is ignored.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use indexmap::IndexMap;
use quota_core::{
    AccountId, FREE_BUCKET, JobCounts, NUM_PRIORITIES, PriorityVector, RequestId, Timestamp,
    WorkerId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{TaskRequest, Worker};

/// Snapshot of a single pool.
///
/// A request id is either pending (in `requests`) or running (in some
/// worker's `run`), never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// All known workers, keyed by id.
    pub workers: BTreeMap<WorkerId, Worker>,
    /// Pending requests in arrival order.
    pub requests: IndexMap<RequestId, TaskRequest>,
    /// Account balances, keyed by account id.
    pub balances: BTreeMap<AccountId, PriorityVector>,
    /// Time of the last balance update.
    pub last_update_time: Timestamp,
}

impl SchedulerState {
    pub fn new(t: Timestamp) -> Self {
        Self {
            last_update_time: t,
            ..Self::default()
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// The worker running `request_id`, if any.
    pub fn running_on(&self, request_id: &str) -> Option<&WorkerId> {
        self.workers
            .values()
            .find(|w| w.run.as_ref().is_some_and(|r| r.request_id() == request_id))
            .map(|w| &w.id)
    }

    /// A pending or running request.
    pub fn get_request(&self, request_id: &str) -> Option<&TaskRequest> {
        if let Some(request) = self.requests.get(request_id) {
            return Some(request);
        }
        self.workers
            .values()
            .filter_map(|w| w.run.as_ref())
            .find(|r| r.request_id() == request_id)
            .map(|r| &r.request)
    }

    /// Whether `request_id` is currently running on `worker_id`.
    pub fn is_assigned(&self, request_id: &str, worker_id: &str) -> bool {
        self.workers
            .get(worker_id)
            .and_then(|w| w.run.as_ref())
            .is_some_and(|r| r.request_id() == request_id)
    }

    pub fn idle_workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values().filter(|w| w.is_idle())
    }

    /// Number of paid-tier tasks running per account, per tier.
    /// Free-tier and accountless tasks are not counted.
    pub fn running_jobs_per_account(&self) -> BTreeMap<AccountId, JobCounts> {
        let mut counts: BTreeMap<AccountId, JobCounts> = BTreeMap::new();
        for run in self.workers.values().filter_map(|w| w.run.as_ref()) {
            let Some(account) = run.account_id() else { continue };
            if run.priority < FREE_BUCKET {
                counts.entry(account.to_string()).or_insert([0; NUM_PRIORITIES])[run.priority] += 1;
            }
        }
        counts
    }

    /// Panic if any request id is both pending and running, or running twice.
    pub fn assert_consistent(&self) {
        let mut running = HashSet::new();
        for worker in self.workers.values() {
            let Some(run) = &worker.run else { continue };
            let id = run.request_id();
            assert!(
                running.insert(id),
                "request {id} is running on more than one worker"
            );
            assert!(
                !self.requests.contains_key(id),
                "request {id} is both pending and running on worker {}",
                worker.id
            );
        }
    }

    // ── Fleet notifications ─────────────────────────────────────────

    /// Enqueue a new request, or refresh a known one.
    ///
    /// A request already believed to be running is re-enqueued (and its
    /// worker dropped) if this notification is at least as new as both the
    /// worker's and the request's confirmed state.
    pub fn add_request(&mut self, request: TaskRequest, t: Timestamp) {
        assert!(!request.id.is_empty(), "empty request id");

        if let Some(known) = self.requests.get_mut(&request.id) {
            known.confirm(t);
            return;
        }

        if let Some(worker_id) = self.running_on(&request.id).cloned() {
            let worker = &self.workers[&worker_id];
            let request_confirmed = worker
                .run
                .as_ref()
                .map_or(0, |r| r.request.confirmed_time);
            if t >= request_confirmed && t >= worker.confirmed_time {
                warn!(
                    request = %request.id,
                    worker = %worker_id,
                    "running request re-added; dropping its worker"
                );
                self.workers.remove(&worker_id);
                self.enqueue(request, t);
            }
            return;
        }

        self.enqueue(request, t);
    }

    fn enqueue(&mut self, mut request: TaskRequest, t: Timestamp) {
        request.confirm(t);
        debug!(request = %request.id, account = ?request.account_id, "request enqueued");
        self.requests.insert(request.id.clone(), request);
    }

    /// Mark a worker idle with the given labels.
    ///
    /// Unknown workers are created. If the worker was running a task, that
    /// task is considered complete and dropped.
    pub fn mark_idle(&mut self, worker_id: &str, labels: BTreeSet<String>, t: Timestamp) {
        assert!(!worker_id.is_empty(), "empty worker id");

        let Some(worker) = self.workers.get_mut(worker_id) else {
            debug!(worker = %worker_id, "new idle worker");
            self.workers
                .insert(worker_id.to_string(), Worker::new(worker_id, labels, t));
            return;
        };

        if t < worker.latest_confirmed_time() {
            debug!(worker = %worker_id, t, "stale idle notification ignored");
            return;
        }

        worker.labels = labels;
        worker.confirm(t);
        if let Some(run) = worker.run.take() {
            info!(
                worker = %worker_id,
                request = %run.request.id,
                priority = run.priority,
                "task completed, worker idle"
            );
        }
    }

    /// The fleet reports `request_id` running on `worker_id` at time `t`.
    pub fn notify_task_running(&mut self, request_id: &str, worker_id: &str, t: Timestamp) {
        assert!(!request_id.is_empty(), "empty request id");
        assert!(!worker_id.is_empty(), "empty worker id");

        let Some(confirmed) = self.get_request(request_id).map(|r| r.confirmed_time) else {
            // Unknown request: our view of the worker may be stale.
            self.drop_worker_if_older(worker_id, t);
            return;
        };
        if t < confirmed {
            return;
        }

        match self.running_on(request_id).cloned() {
            Some(alleged) if alleged == worker_id => {
                if let Some(worker) = self.workers.get_mut(worker_id) {
                    worker.confirm(t);
                    if let Some(run) = worker.run.as_mut() {
                        run.request.confirm(t);
                    }
                }
                return;
            }
            Some(alleged) => {
                warn!(
                    request = %request_id,
                    expected_worker = %alleged,
                    actual_worker = %worker_id,
                    "request running on unexpected worker; dropping expected worker"
                );
                self.workers.remove(&alleged);
            }
            None => {
                if let Some(request) = self.requests.get_mut(request_id) {
                    request.confirm(t);
                }
            }
        }

        self.drop_worker_if_older(worker_id, t);
    }

    /// The fleet reports `request_id` neither running nor pending at time `t`.
    pub fn notify_task_absent(&mut self, request_id: &str, t: Timestamp) {
        assert!(!request_id.is_empty(), "empty request id");

        if let Some(worker_id) = self.running_on(request_id).cloned() {
            let worker = &self.workers[&worker_id];
            if t >= worker.latest_confirmed_time() {
                info!(request = %request_id, worker = %worker_id, "running task absent; dropping worker");
                self.workers.remove(&worker_id);
            }
            return;
        }

        if let Some(request) = self.requests.get(request_id) {
            if t >= request.confirmed_time {
                info!(request = %request_id, "pending task absent; removed from queue");
                self.requests.shift_remove(request_id);
            }
        }
    }

    /// Remove a worker from the pool along with any task it runs.
    pub fn remove_worker(&mut self, worker_id: &str) -> Option<Worker> {
        let removed = self.workers.remove(worker_id);
        if removed.is_some() {
            debug!(worker = %worker_id, "worker removed");
        }
        removed
    }

    fn drop_worker_if_older(&mut self, worker_id: &str, t: Timestamp) {
        let stale = self
            .workers
            .get(worker_id)
            .is_some_and(|w| t >= w.latest_confirmed_time());
        if stale {
            warn!(worker = %worker_id, "worker state inconsistent with fleet; dropping");
            self.workers.remove(worker_id);
        }
    }
}
