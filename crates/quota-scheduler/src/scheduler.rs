//! Scheduler — one pool's configuration and state, driven over time.

use std::collections::BTreeSet;

use quota_core::{
    AccountConfig, AccountId, FREE_BUCKET, PoolSpec, PriorityVector, SchedulerConfig, Timestamp,
    WorkerId, elapsed_secs, next_balance,
};
use quota_state::{Mutation, PoolSnapshot, SchedulerState, TaskRequest};
use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::pass::SchedulingPass;

/// Quota scheduler for a single pool.
///
/// Not internally synchronized: the driver serializes calls per pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    config: SchedulerConfig,
    state: SchedulerState,
}

impl Scheduler {
    /// An empty scheduler whose clock starts at `t`.
    pub fn new(t: Timestamp) -> Self {
        Self {
            config: SchedulerConfig::default(),
            state: SchedulerState::new(t),
        }
    }

    /// Build a scheduler from a configured pool: its accounts with their
    /// initial balances, its workers (idle), and its requests.
    pub fn from_pool(spec: &PoolSpec, t: Timestamp) -> SchedulerResult<Self> {
        let mut scheduler = Self::new(t);
        scheduler.config = spec.scheduler_config();
        for (id, account) in &spec.accounts {
            scheduler.state.balances.insert(id.clone(), account.initial_balance());
        }
        for worker in &spec.workers {
            scheduler.mark_idle(&worker.id, worker.labels.iter().cloned().collect(), t);
        }
        for request in &spec.requests {
            let request = TaskRequest::new(&request.id, request.account.as_deref(), t)
                .with_base_labels(request.base_labels.iter().cloned())
                .with_provisionable_labels(request.provisionable_labels.iter().cloned());
            scheduler.add_request(request, t)?;
        }
        info!(
            accounts = scheduler.config.accounts.len(),
            workers = scheduler.state.workers.len(),
            requests = scheduler.state.requests.len(),
            "scheduler built from pool config"
        );
        Ok(scheduler)
    }

    pub fn from_snapshot(snapshot: PoolSnapshot) -> Self {
        Self {
            config: snapshot.config,
            state: snapshot.state,
        }
    }

    pub fn to_snapshot(&self, pool_id: &str) -> PoolSnapshot {
        PoolSnapshot::new(pool_id, self.config.clone(), self.state.clone())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn set_preemption_disabled(&mut self, disabled: bool) {
        self.config.disable_preemption = disabled;
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// Add or replace an account's config and reset its balance to
    /// `initial_balance` (zero-padded or truncated to every tier).
    pub fn add_account(
        &mut self,
        id: impl Into<AccountId>,
        config: AccountConfig,
        initial_balance: &[f64],
    ) {
        let id = id.into();
        debug!(account = %id, "account added");
        self.config.accounts.insert(id.clone(), config);
        self.state
            .balances
            .insert(id, PriorityVector::new(initial_balance));
    }

    /// Drop an account's config. Its balance is discarded at the next
    /// `update_time`; its queued requests fall to `FREE_BUCKET`.
    pub fn remove_account(&mut self, id: &str) -> Option<AccountConfig> {
        let removed = self.config.accounts.remove(id);
        if removed.is_some() {
            debug!(account = %id, "account removed");
        }
        removed
    }

    // ── Fleet notifications ─────────────────────────────────────────

    pub fn add_request(&mut self, request: TaskRequest, t: Timestamp) -> SchedulerResult<()> {
        if request.id.is_empty() {
            return Err(SchedulerError::EmptyRequestId);
        }
        self.state.add_request(request, t);
        Ok(())
    }

    pub fn mark_idle(&mut self, worker_id: &str, labels: BTreeSet<String>, t: Timestamp) {
        self.state.mark_idle(worker_id, labels, t);
    }

    pub fn notify_task_running(&mut self, request_id: &str, worker_id: &str, t: Timestamp) {
        self.state.notify_task_running(request_id, worker_id, t);
    }

    pub fn notify_task_absent(&mut self, request_id: &str, t: Timestamp) {
        self.state.notify_task_absent(request_id, t);
    }

    pub fn remove_worker(&mut self, worker_id: &str) -> bool {
        self.state.remove_worker(worker_id).is_some()
    }

    pub fn is_assigned(&self, request_id: &str, worker_id: &str) -> bool {
        self.state.is_assigned(request_id, worker_id)
    }

    pub fn get_request(&self, request_id: &str) -> Option<&TaskRequest> {
        self.state.get_request(request_id)
    }

    pub fn running_on(&self, request_id: &str) -> Option<&WorkerId> {
        self.state.running_on(request_id)
    }

    // ── Time and scheduling ─────────────────────────────────────────

    /// Advance the clock to `t`.
    ///
    /// Every task running at a paid tier accrues the elapsed seconds as
    /// cost at that tier and counts against its account. Balances of
    /// configured accounts then advance with `next_balance`; balances of
    /// accounts no longer configured are dropped.
    pub fn update_time(&mut self, t: Timestamp) -> SchedulerResult<()> {
        let previous = self.state.last_update_time;
        if t < previous {
            return Err(SchedulerError::UpdateOrder { previous, next: t });
        }
        let elapsed = elapsed_secs(previous, t);

        let running = self.state.running_jobs_per_account();
        for run in self.state.workers.values_mut().filter_map(|w| w.run.as_mut()) {
            if run.priority < FREE_BUCKET {
                run.cost[run.priority] += elapsed;
            }
        }

        self.state.balances = self
            .config
            .accounts
            .iter()
            .map(|(id, account)| {
                let before = self.state.balances.get(id).copied().unwrap_or_default();
                let jobs = running.get(id).copied().unwrap_or_default();
                (id.clone(), next_balance(&before, account, elapsed, &jobs))
            })
            .collect();
        self.state.last_update_time = t;

        debug!(t, elapsed, accounts = self.state.balances.len(), "time advanced");
        Ok(())
    }

    /// Run one scheduling pass. Every returned mutation has already been
    /// applied, in the order returned.
    pub fn run_once(&mut self) -> Vec<Mutation> {
        SchedulingPass::new(&self.config, &mut self.state).run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Timestamp = 1_000;

    fn v(values: &[f64]) -> PriorityVector {
        PriorityVector::new(values)
    }

    fn labels(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn rates(values: &[f64]) -> AccountConfig {
        AccountConfig::new(v(values), PriorityVector::zero())
    }

    /// Enqueue `rid` and start it on a fresh worker `wid` at `priority`.
    fn add_running(s: &mut Scheduler, rid: &str, wid: &str, account: &str, priority: usize) {
        s.add_request(TaskRequest::new(rid, Some(account), 0), 0).unwrap();
        s.mark_idle(wid, BTreeSet::new(), 0);
        s.state.assign_idle_worker(wid, rid, priority);
    }

    fn assign(worker: &str, request: &str, priority: usize) -> Mutation {
        Mutation::AssignIdleWorker {
            worker_id: worker.to_string(),
            request_id: request.to_string(),
            priority,
        }
    }

    // ── update_time ─────────────────────────────────────────────────

    fn charging_scheduler() -> Scheduler {
        let mut s = Scheduler::new(0);
        s.add_account(
            "acct",
            AccountConfig::with_max_charge_seconds(v(&[1.0, 2.0, 3.0]), 2.0),
            &[],
        );
        s
    }

    #[test]
    fn add_account_zeroes_balance() {
        let s = charging_scheduler();
        assert_eq!(s.state.balances["acct"], PriorityVector::zero());
    }

    #[test]
    fn update_time_recharges() {
        let mut s = charging_scheduler();
        s.update_time(SEC).unwrap();
        assert_eq!(s.state.balances["acct"], v(&[1.0, 2.0, 3.0]));
        assert_eq!(s.state.last_update_time, SEC);
    }

    #[test]
    fn update_time_saturates_at_cap() {
        let mut s = charging_scheduler();
        s.update_time(10 * SEC).unwrap();
        assert_eq!(s.state.balances["acct"], v(&[2.0, 4.0, 6.0]));
    }

    #[test]
    fn update_time_drops_unconfigured_balances() {
        let mut s = charging_scheduler();
        s.remove_account("acct");
        s.update_time(SEC).unwrap();
        assert!(!s.state.balances.contains_key("acct"));
    }

    #[test]
    fn update_time_charges_running_tasks() {
        let mut s = charging_scheduler();
        add_running(&mut s, "r1", "w1", "acct", 0);
        add_running(&mut s, "r2", "w2", "acct", 0);
        assert!(s.state.requests.is_empty());

        s.update_time(SEC).unwrap();
        assert_eq!(s.state.balances["acct"], v(&[-1.0, 2.0, 3.0]));
        assert_eq!(s.state.workers["w1"].run.as_ref().unwrap().cost, v(&[1.0, 0.0, 0.0]));
    }

    #[test]
    fn free_bucket_tasks_accrue_nothing() {
        let mut s = charging_scheduler();
        add_running(&mut s, "r1", "w1", "acct", FREE_BUCKET);

        s.update_time(SEC).unwrap();
        assert_eq!(s.state.balances["acct"], v(&[1.0, 2.0, 3.0]));
        assert_eq!(s.state.workers["w1"].run.as_ref().unwrap().cost, PriorityVector::zero());
    }

    #[test]
    fn update_time_backwards_is_rejected() {
        let mut s = Scheduler::new(100 * SEC);
        let before = s.clone();
        let err = s.update_time(0).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::UpdateOrder {
                previous: 100 * SEC,
                next: 0
            }
        );
        assert_eq!(s, before);

        assert!(Scheduler::new(0).update_time(SEC).is_ok());
    }

    #[test]
    fn empty_request_id_is_an_error() {
        let mut s = Scheduler::new(0);
        let err = s.add_request(TaskRequest::new("", None, 0), 0).unwrap_err();
        assert_eq!(err, SchedulerError::EmptyRequestId);
    }

    // ── Idle matching ───────────────────────────────────────────────

    #[test]
    fn provisionable_labels_break_ties() {
        let mut s = Scheduler::new(0);
        s.mark_idle("w0", BTreeSet::new(), 0);
        s.mark_idle("w1", labels(&["label1"]), 0);
        for (id, label) in [("t1", "label1"), ("t2", "label2")] {
            let request = TaskRequest::new(id, Some("a1"), 0).with_provisionable_labels([label]);
            s.add_request(request, 0).unwrap();
        }
        s.add_account("a1", rates(&[]), &[2.0]);

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("w1", "t1", 0), assign("w0", "t2", 0)]);
    }

    #[test]
    fn accountless_request_runs_free() {
        let mut s = Scheduler::new(0);
        s.mark_idle("worker", BTreeSet::new(), 0);
        s.add_request(TaskRequest::new("req", None, 0), 0).unwrap();

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("worker", "req", FREE_BUCKET)]);
    }

    #[test]
    fn unconfigured_account_runs_free() {
        let mut s = Scheduler::new(0);
        s.mark_idle("worker", BTreeSet::new(), 0);
        s.add_request(TaskRequest::new("req", Some("ghost"), 0), 0).unwrap();

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("worker", "req", FREE_BUCKET)]);
    }

    #[test]
    fn fanout_limit_pushes_extra_requests_to_free_bucket() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[]).with_max_fanout(1), &[1.0]);
        s.add_request(TaskRequest::new("r1", Some("acct"), 0), 0).unwrap();
        s.add_request(TaskRequest::new("r2", Some("acct"), 0), 0).unwrap();
        s.mark_idle("w1", BTreeSet::new(), 0);
        s.mark_idle("w2", BTreeSet::new(), 0);

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("w1", "r1", 0), assign("w2", "r2", FREE_BUCKET)]);
    }

    #[test]
    fn disabled_free_tasks_stay_queued() {
        let mut s = Scheduler::new(0);
        s.add_account(
            "acct",
            rates(&[]).with_max_fanout(1).with_free_tasks_disabled(),
            &[1.0],
        );
        s.add_request(TaskRequest::new("r1", Some("acct"), 0), 0).unwrap();
        s.add_request(TaskRequest::new("r2", Some("acct"), 0), 0).unwrap();
        s.mark_idle("w1", BTreeSet::new(), 0);
        s.mark_idle("w2", BTreeSet::new(), 0);

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("w1", "r1", 0)]);
        assert!(s.state.requests.contains_key("r2"));
        assert!(s.state.workers["w2"].is_idle());
    }

    #[test]
    fn zero_balance_with_free_tasks_disabled_is_never_run() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[]).with_free_tasks_disabled(), &[]);
        s.add_request(TaskRequest::new("r1", Some("acct"), 0), 0).unwrap();
        s.mark_idle("w1", BTreeSet::new(), 0);

        assert!(s.run_once().is_empty());
    }

    #[test]
    fn provisionable_label_finds_rare_request() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[]).with_max_fanout(1), &[1.0]);
        for i in 0..500 {
            let request = TaskRequest::new(format!("t{i}"), Some("acct"), 0).with_provisionable_labels(["a"]);
            s.add_request(request, 0).unwrap();
        }
        let request = TaskRequest::new("reqb", Some("acct"), 0).with_provisionable_labels(["b"]);
        s.add_request(request, 0).unwrap();
        s.mark_idle("worker", labels(&["b", "c"]), 0);

        let muts = s.run_once();
        assert_eq!(muts, vec![assign("worker", "reqb", 0)]);
    }

    #[test]
    fn unsatisfied_base_label_never_matches() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[]), &[1.0]);
        s.mark_idle("worker", BTreeSet::new(), 0);
        let request = TaskRequest::new("req", Some("acct"), 0).with_base_labels(["unsatisfied"]);
        s.add_request(request, 0).unwrap();

        assert!(s.run_once().is_empty());
    }

    #[test]
    fn rare_worker_gets_rare_request() {
        let mut s = Scheduler::new(0);
        for i in 0..10 {
            s.mark_idle(&format!("common-worker-{i}"), labels(&["common"]), 0);
        }
        s.mark_idle("rare-worker", labels(&["common", "rare"]), 0);
        s.add_account("acct", rates(&[]), &[1.0]);
        for i in 0..10 {
            let request = TaskRequest::new(format!("common-{i}"), Some("acct"), 0).with_base_labels(["common"]);
            s.add_request(request, 0).unwrap();
        }
        let request = TaskRequest::new("rare", Some("acct"), 0).with_base_labels(["common", "rare"]);
        s.add_request(request, 0).unwrap();

        let muts = s.run_once();
        assert_eq!(muts.len(), 11);
        assert!(s.is_assigned("rare", "rare-worker"));
    }

    #[test]
    fn earlier_enqueue_time_wins() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[]), &[1.0]);
        s.add_request(TaskRequest::new("late", Some("acct"), 20), 20).unwrap();
        s.add_request(TaskRequest::new("early", Some("acct"), 10), 20).unwrap();
        s.mark_idle("w1", BTreeSet::new(), 20);

        assert_eq!(s.run_once(), vec![assign("w1", "early", 0)]);
    }

    #[test]
    fn no_op_pass_leaves_state_unchanged() {
        let mut s = Scheduler::new(0);
        s.add_account("acct", rates(&[1.0]), &[1.0, 1.0]);
        add_running(&mut s, "r1", "w1", "acct", 1);
        let before = s.clone();

        assert!(s.run_once().is_empty());
        assert_eq!(s, before);

        let mut empty = Scheduler::new(5);
        let before = empty.clone();
        assert!(empty.run_once().is_empty());
        assert_eq!(empty, before);
    }

    // ── Reprioritization ────────────────────────────────────────────

    fn reprioritize_fixture(priority: usize) -> Scheduler {
        let mut s = Scheduler::new(0);
        s.config.accounts.insert("a1".to_string(), rates(&[1.1, 0.9]));
        s.state.balances.insert(
            "a1".to_string(),
            v(&[2.0 * quota_core::DEMOTE_THRESHOLD, 2.0 * quota_core::PROMOTE_THRESHOLD, 0.0]),
        );
        add_running(&mut s, "r1", "w1", "a1", priority);
        add_running(&mut s, "r2", "w2", "a1", priority);
        s.state.workers.get_mut("w2").unwrap().run.as_mut().unwrap().cost = v(&[1.0]);
        s
    }

    fn priority_of(s: &Scheduler, worker: &str) -> usize {
        s.state.workers[worker].run.as_ref().unwrap().priority
    }

    #[test]
    fn cheaper_task_is_demoted() {
        let mut s = reprioritize_fixture(0);
        let muts = s.run_once();
        assert_eq!(priority_of(&s, "w1"), 1);
        assert_eq!(priority_of(&s, "w2"), 0);
        assert_eq!(
            muts,
            vec![Mutation::ChangePriority {
                worker_id: "w1".to_string(),
                priority: 1
            }]
        );
    }

    #[test]
    fn more_expensive_task_is_promoted() {
        let mut s = reprioritize_fixture(2);
        s.run_once();
        assert_eq!(priority_of(&s, "w1"), 2);
        assert_eq!(priority_of(&s, "w2"), 1);
    }

    // ── Preemption ──────────────────────────────────────────────────

    fn preempt_fixture() -> Scheduler {
        let mut s = Scheduler::new(0);
        s.add_account(
            "a1",
            AccountConfig::with_max_charge_seconds(v(&[1.0, 1.0, 1.0]), 0.0),
            &[0.5 * quota_core::PROMOTE_THRESHOLD, 1.0],
        );
        add_running(&mut s, "r1", "w1", "a1", 1);
        add_running(&mut s, "r2", "w2", "a1", 1);
        s.state.workers.get_mut("w1").unwrap().run.as_mut().unwrap().cost = v(&[0.0, 1.0, 0.0]);
        s
    }

    #[test]
    fn cheaper_running_task_is_preempted() {
        let mut s = preempt_fixture();
        s.add_account("a2", rates(&[]), &[]);
        s.add_request(TaskRequest::new("r3", Some("a2"), 0), 0).unwrap();
        s.state.balances.insert("a2".to_string(), v(&[1.0]));

        s.update_time(SEC).unwrap();
        let muts = s.run_once();

        assert_eq!(
            muts,
            vec![Mutation::PreemptTask {
                worker_id: "w2".to_string(),
                request_id: "r3".to_string(),
                task_to_abort: "r2".to_string(),
                priority: 0,
            }]
        );
        assert!(s.state.requests.contains_key("r2"));
        assert!(s.is_assigned("r3", "w2"));
        s.state.assert_consistent();
    }

    #[test]
    fn insufficient_balance_does_not_preempt() {
        let mut s = preempt_fixture();
        s.add_account("a2", rates(&[]), &[]);
        s.add_request(TaskRequest::new("r3", Some("a2"), 0), 0).unwrap();

        assert!(s.run_once().is_empty());
    }

    #[test]
    fn account_running_lower_priority_cannot_preempt() {
        let mut s = preempt_fixture();
        s.add_request(TaskRequest::new("r3", Some("a1"), 0), 0).unwrap();

        assert!(s.run_once().is_empty());
    }

    #[test]
    fn disabled_preemption_is_respected() {
        let mut s = preempt_fixture();
        s.set_preemption_disabled(true);
        s.add_account("a2", rates(&[]), &[10.0]);
        s.add_request(TaskRequest::new("r3", Some("a2"), 0), 0).unwrap();

        assert!(s.run_once().is_empty());
    }

    #[test]
    fn each_worker_is_preempted_at_most_once() {
        let mut s = preempt_fixture();
        s.add_account("a2", rates(&[]), &[10.0]);
        for id in ["r3", "r4", "r5"] {
            s.add_request(TaskRequest::new(id, Some("a2"), 0), 0).unwrap();
        }

        let muts = s.run_once();
        let preempted: Vec<&str> = muts.iter().map(Mutation::worker_id).collect();
        assert_eq!(preempted, ["w2", "w1"]);
        assert_eq!(s.state.requests.len(), 3);
        s.state.assert_consistent();
    }

    // ── Snapshots ───────────────────────────────────────────────────

    #[test]
    fn snapshot_round_trip_preserves_scheduler() {
        let mut s = preempt_fixture();
        s.update_time(3 * SEC).unwrap();

        let snapshot = s.to_snapshot("pool");
        assert_eq!(snapshot.pool_id, "pool");
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = Scheduler::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored, s);
    }

    #[test]
    fn from_pool_seeds_everything() {
        let config = quota_core::QuotaConfig::from_toml_str(
            r#"
[[pools]]
id = "p"
disable_preemption = true
[pools.accounts.a]
charge_rate = [1.0]
initial_balance = [3.0]
[[pools.workers]]
id = "w1"
labels = ["os:linux"]
[[pools.requests]]
id = "r1"
account = "a"
base_labels = ["os:linux"]
"#,
        )
        .unwrap();

        let mut s = Scheduler::from_pool(&config.pools[0], 7).unwrap();
        assert!(s.config().disable_preemption);
        assert_eq!(s.config(), &config.pools[0].scheduler_config());
        assert_eq!(s.state().balances["a"], v(&[3.0]));
        assert_eq!(s.state().last_update_time, 7);

        assert_eq!(s.run_once(), vec![assign("w1", "r1", 0)]);
    }
}
