//! End-to-end scheduling over many passes.

use std::collections::BTreeSet;

use quota_core::{AccountConfig, FREE_BUCKET, PriorityVector, Timestamp};
use quota_scheduler::{Scheduler, SchedulerError};
use quota_state::{Mutation, TaskRequest};

const SEC: Timestamp = 1_000;

fn account(rates: &[f64], max_secs: f64) -> AccountConfig {
    AccountConfig::with_max_charge_seconds(PriorityVector::new(rates), max_secs)
}

fn idle_pool(workers: usize, t: Timestamp) -> Scheduler {
    let mut s = Scheduler::new(t);
    for i in 0..workers {
        s.mark_idle(&format!("w{i}"), BTreeSet::new(), t);
    }
    s
}

fn enqueue(s: &mut Scheduler, id: &str, account: &str, t: Timestamp) {
    s.add_request(TaskRequest::new(id, Some(account), t), t).unwrap();
}

#[test]
fn request_lifecycle_through_reconciler() {
    let mut s = idle_pool(1, 0);
    s.add_account("team", account(&[1.0], 10.0), &[1.0]);
    enqueue(&mut s, "job-1", "team", 0);
    enqueue(&mut s, "job-2", "team", 0);

    let muts = s.run_once();
    assert_eq!(muts.len(), 1);
    assert!(s.is_assigned("job-1", "w0"));

    s.notify_task_running("job-1", "w0", SEC);
    assert!(s.is_assigned("job-1", "w0"));

    // Worker reports idle again: job-1 is done.
    s.mark_idle("w0", BTreeSet::new(), 2 * SEC);
    assert!(s.get_request("job-1").is_none());

    s.update_time(2 * SEC).unwrap();
    let muts = s.run_once();
    assert_eq!(muts.len(), 1);
    assert_eq!(s.running_on("job-2").map(String::as_str), Some("w0"));
}

#[test]
fn busy_account_drains_and_falls_to_lower_tiers() {
    let mut s = idle_pool(4, 0);
    s.add_account("greedy", account(&[1.0, 1.0, 1.0], 5.0), &[5.0, 5.0, 5.0]);
    for i in 0..4 {
        enqueue(&mut s, &format!("r{i}"), "greedy", 0);
    }

    let muts = s.run_once();
    assert!(muts.iter().all(|m| m.priority() == 0));
    assert_eq!(muts.len(), 4);

    // Four tasks against a rate of one: P0 goes negative quickly.
    for tick in 1..=20 {
        s.update_time(tick * SEC).unwrap();
        s.run_once();
        s.state().assert_consistent();
    }
    let balance = s.state().balances["greedy"];
    assert!(balance[0] < 0.0, "balance {balance:?}");

    let priorities: Vec<usize> = s
        .state()
        .workers
        .values()
        .filter_map(|w| w.run.as_ref())
        .map(|r| r.priority)
        .collect();
    assert_eq!(priorities.len(), 4);
    assert!(priorities.iter().any(|p| *p > 0), "priorities {priorities:?}");
}

#[test]
fn paying_account_displaces_free_work() {
    let mut s = idle_pool(2, 0);
    s.add_request(TaskRequest::new("free-1", None, 0), 0).unwrap();
    s.add_request(TaskRequest::new("free-2", None, 0), 0).unwrap();
    let muts = s.run_once();
    assert!(muts.iter().all(|m| m.priority() == FREE_BUCKET));

    s.update_time(10 * SEC).unwrap();
    s.add_account("paid", account(&[1.0], 60.0), &[3.0]);
    enqueue(&mut s, "urgent", "paid", 10 * SEC);

    let muts = s.run_once();
    let preemptions: Vec<&Mutation> = muts
        .iter()
        .filter(|m| matches!(m, Mutation::PreemptTask { .. }))
        .collect();
    assert_eq!(preemptions.len(), 1);
    assert!(s.running_on("urgent").is_some());

    // The displaced free task is pending again.
    let pending: Vec<&str> = s.state().requests.keys().map(String::as_str).collect();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].starts_with("free-"));
}

#[test]
fn preemption_conserves_quota_between_accounts() {
    let mut s = idle_pool(1, 0);
    s.add_account("low", account(&[0.0, 1.0], 100.0), &[0.0, 2.0]);
    s.add_account("high", account(&[0.0], 100.0), &[50.0]);
    enqueue(&mut s, "low-job", "low", 0);
    s.run_once();
    assert!(s.is_assigned("low-job", "w0"));

    s.update_time(3 * SEC).unwrap();
    enqueue(&mut s, "high-job", "high", 3 * SEC);
    let before = s.state().balances["low"] + s.state().balances["high"];

    let muts = s.run_once();
    assert_eq!(
        muts,
        vec![Mutation::PreemptTask {
            worker_id: "w0".to_string(),
            request_id: "high-job".to_string(),
            task_to_abort: "low-job".to_string(),
            priority: 0,
        }]
    );
    let after = s.state().balances["low"] + s.state().balances["high"];
    assert_eq!(before, after);

    // low-job ran 3s at P1 and got that back; high-job inherits the cost.
    let run = s.state().workers["w0"].run.as_ref().unwrap();
    assert_eq!(run.cost, PriorityVector::new(&[0.0, 3.0]));
}

#[test]
fn clock_only_moves_forward() {
    let mut s = Scheduler::new(5 * SEC);
    assert_eq!(
        s.update_time(4 * SEC),
        Err(SchedulerError::UpdateOrder {
            previous: 5 * SEC,
            next: 4 * SEC
        })
    );
    assert_eq!(s.update_time(5 * SEC), Ok(()));
}
