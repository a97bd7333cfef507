//! A single scheduling pass.
//!
//! The pass works on a per-tier view of the pending requests built once
//! at the start. Every decision is applied to the state immediately, so
//! later steps (and later tiers) see the effects of earlier ones.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use quota_core::{
    AccountId, FREE_BUCKET, NUM_PRIORITIES, Priority, PriorityVector, RequestId, SchedulerConfig,
    WorkerId, best_priority_for, should_demote, should_promote,
};
use quota_state::{Mutation, SchedulerState, TaskRequest};
use tracing::debug;

use crate::matching::{MatchMode, best_match};

/// A pending request as seen by the pass.
struct Candidate {
    request: TaskRequest,
    matched: bool,
    /// Account has free tasks disabled; never run this at `FREE_BUCKET`.
    skip_if_free: bool,
}

/// Remaining paid-tier tasks each configured account may start.
struct FanoutBudget(BTreeMap<AccountId, i64>);

impl FanoutBudget {
    fn new(config: &SchedulerConfig, state: &SchedulerState) -> Self {
        let mut remaining: BTreeMap<AccountId, i64> = config
            .accounts
            .iter()
            .map(|(id, account)| {
                let limit = match account.max_fanout {
                    0 => i64::MAX,
                    n => i64::from(n),
                };
                (id.clone(), limit)
            })
            .collect();
        for run in state.workers.values().filter_map(|w| w.run.as_ref()) {
            if let Some(left) = run.account_id().and_then(|a| remaining.get_mut(a)) {
                *left -= 1;
            }
        }
        Self(remaining)
    }

    /// Unknown and missing accounts have no budget.
    fn is_throttled(&self, account: Option<&str>) -> bool {
        account.and_then(|a| self.0.get(a)).is_none_or(|left| *left <= 0)
    }

    fn consume(&mut self, account: Option<&str>) {
        if let Some(left) = account.and_then(|a| self.0.get_mut(a)) {
            *left -= 1;
        }
    }
}

pub(crate) struct SchedulingPass<'a> {
    config: &'a SchedulerConfig,
    state: &'a mut SchedulerState,
    idle_workers: BTreeSet<WorkerId>,
    /// Pending requests per tier, `FREE_BUCKET` last.
    queues: [Vec<Candidate>; NUM_PRIORITIES + 1],
    fanout: FanoutBudget,
    output: Vec<Mutation>,
}

impl<'a> SchedulingPass<'a> {
    pub(crate) fn new(config: &'a SchedulerConfig, state: &'a mut SchedulerState) -> Self {
        let fanout = FanoutBudget::new(config, state);
        let idle_workers = state.idle_workers().map(|w| w.id.clone()).collect();

        let mut queues: [Vec<Candidate>; NUM_PRIORITIES + 1] = std::array::from_fn(|_| Vec::new());
        for request in state.requests.values() {
            let account_id = request.account_id.as_deref();
            let account = account_id.and_then(|id| config.accounts.get(id));
            let priority = match account_id {
                Some(id) if account.is_some() && !fanout.is_throttled(Some(id)) => {
                    best_priority_for(state.balances.get(id))
                }
                _ => FREE_BUCKET,
            };
            queues[priority].push(Candidate {
                request: request.clone(),
                matched: false,
                skip_if_free: account.is_some_and(|a| a.disable_free_tasks),
            });
        }
        // Stable, so equal enqueue times keep arrival order.
        for queue in &mut queues {
            queue.sort_by_key(|c| c.request.enqueue_time);
        }

        Self {
            config,
            state,
            idle_workers,
            queues,
            fanout,
            output: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) -> Vec<Mutation> {
        for priority in 0..NUM_PRIORITIES {
            self.match_idle_workers(priority, MatchMode::ProvisionAware);
            self.match_idle_workers(priority, MatchMode::Basic);
            self.reprioritize(priority);
            if !self.config.disable_preemption {
                self.preempt(priority);
            }
            self.move_throttled(priority);
        }
        self.match_idle_workers(FREE_BUCKET, MatchMode::ProvisionAware);
        self.match_idle_workers(FREE_BUCKET, MatchMode::Basic);

        debug!(
            mutations = self.output.len(),
            idle_workers = self.idle_workers.len(),
            pending = self.state.requests.len(),
            "scheduling pass complete"
        );
        self.output
    }

    fn apply(&mut self, mutation: Mutation) {
        self.state.apply(&mutation);
        self.output.push(mutation);
    }

    /// Record that the candidate at `index` of tier `priority` got a worker.
    fn take_candidate(&mut self, priority: Priority, index: usize) -> RequestId {
        let candidate = &mut self.queues[priority][index];
        candidate.matched = true;
        self.fanout.consume(candidate.request.account_id.as_deref());
        candidate.request.id.clone()
    }

    fn should_skip(&self, candidate: &Candidate, priority: Priority) -> bool {
        if candidate.matched {
            return true;
        }
        if priority == FREE_BUCKET {
            candidate.skip_if_free
        } else {
            self.fanout.is_throttled(candidate.request.account_id.as_deref())
        }
    }

    // ── Idle matching ───────────────────────────────────────────────

    fn match_idle_workers(&mut self, priority: Priority, mode: MatchMode) {
        let idle: Vec<WorkerId> = self.idle_workers.iter().cloned().collect();
        for worker_id in idle {
            let labels = &self.state.workers[&worker_id].labels;
            let queue = &self.queues[priority];
            let best = best_match(labels, queue.iter().map(|c| &c.request), mode, |i, _| {
                !self.should_skip(&queue[i], priority)
            });
            let Some(index) = best else { continue };

            let request_id = self.take_candidate(priority, index);
            self.idle_workers.remove(&worker_id);
            self.apply(Mutation::AssignIdleWorker {
                worker_id,
                request_id,
                priority,
            });
        }
    }

    // ── Reprioritization ────────────────────────────────────────────

    /// Demote an account's tasks out of `priority` when its balance there is
    /// deeply negative and its tasks outrun the charge rate, or promote
    /// tasks running below `priority` into it when the balance is high and
    /// the charge rate can sustain more.
    fn reprioritize(&mut self, priority: Priority) {
        let config = self.config;
        for (account_id, account) in &config.accounts {
            let Some(balance) = self.state.balances.get(account_id) else {
                continue;
            };
            let balance = balance[priority];
            let demote = should_demote(balance);
            let promote = should_promote(balance);
            if !demote && !promote {
                continue;
            }

            let mut at_priority = self.running_tasks(account_id, |p| p == priority);
            let headroom = account.charge_rate[priority] - at_priority.len() as f64;

            if demote && headroom < 0.0 {
                at_priority.sort_by(|a, b| cmp_cost(&a.1, &b.1));
                let count = (-headroom).ceil() as usize;
                debug!(account = %account_id, priority, count, balance, "demoting running tasks");
                for (worker_id, _) in at_priority.into_iter().take(count) {
                    self.apply(Mutation::ChangePriority {
                        worker_id,
                        priority: priority + 1,
                    });
                }
            } else if promote && headroom > 0.0 {
                let mut below = self.running_tasks(account_id, |p| p > priority);
                below.sort_by(|a, b| cmp_cost(&b.1, &a.1));
                let count = headroom.ceil() as usize;
                debug!(account = %account_id, priority, count, balance, "promoting running tasks");
                for (worker_id, _) in below.into_iter().take(count) {
                    self.apply(Mutation::ChangePriority { worker_id, priority });
                }
            }
        }
    }

    /// Workers running `account`'s tasks at a priority satisfying `pred`,
    /// with each task's accrued cost.
    fn running_tasks(
        &self,
        account: &str,
        pred: impl Fn(Priority) -> bool,
    ) -> Vec<(WorkerId, PriorityVector)> {
        self.state
            .workers
            .values()
            .filter_map(|w| w.run.as_ref().map(|run| (w, run)))
            .filter(|(_, run)| run.account_id() == Some(account) && pred(run.priority))
            .map(|(w, run)| (w.id.clone(), run.cost))
            .collect()
    }

    // ── Preemption ──────────────────────────────────────────────────

    /// Replace tasks running below `priority` with pending requests at
    /// `priority`, cheapest incumbent first. An account running anything
    /// below `priority` may not preempt at it.
    fn preempt(&mut self, priority: Priority) {
        let mut candidates: Vec<(WorkerId, RequestId, PriorityVector)> = Vec::new();
        let mut banned: BTreeSet<AccountId> = BTreeSet::new();
        for worker in self.state.workers.values() {
            let Some(run) = worker.run.as_ref().filter(|r| r.priority > priority) else {
                continue;
            };
            candidates.push((worker.id.clone(), run.request.id.clone(), run.cost));
            if let Some(account) = run.account_id() {
                banned.insert(account.to_string());
            }
        }
        if candidates.is_empty() {
            return;
        }
        candidates.sort_by(|a, b| cmp_cost(&a.2, &b.2));

        for (worker_id, task_to_abort, cost) in candidates {
            let labels = &self.state.workers[&worker_id].labels;
            let balances = &self.state.balances;
            let queue = &self.queues[priority];
            let best = best_match(labels, queue.iter().map(|c| &c.request), MatchMode::Basic, |i, request| {
                let Some(account) = request.account_id.as_deref() else {
                    return false;
                };
                !queue[i].matched
                    && !banned.contains(account)
                    && !self.fanout.is_throttled(Some(account))
                    && cost.less(&balances.get(account).copied().unwrap_or_default())
            });
            let Some(index) = best else { continue };

            let request_id = self.take_candidate(priority, index);
            self.apply(Mutation::PreemptTask {
                worker_id,
                request_id,
                task_to_abort,
                priority,
            });
        }
    }

    // ── Throttling ──────────────────────────────────────────────────

    /// Requests at `priority` whose account ran out of fanout during this
    /// pass get a second chance in the `FREE_BUCKET` round.
    fn move_throttled(&mut self, priority: Priority) {
        let queue = std::mem::take(&mut self.queues[priority]);
        let (throttled, kept): (Vec<_>, Vec<_>) = queue.into_iter().partition(|c| {
            !c.matched
                && !c.skip_if_free
                && self.fanout.is_throttled(c.request.account_id.as_deref())
        });
        if !throttled.is_empty() {
            debug!(priority, count = throttled.len(), "throttled requests moved to free bucket");
        }
        self.queues[priority] = kept;
        self.queues[FREE_BUCKET].extend(throttled);
    }
}

fn cmp_cost(a: &PriorityVector, b: &PriorityVector) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}
