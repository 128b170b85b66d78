// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenarios: several worker identities sharing one
//! database, exactly as independent processes would.

use netq_core::{Target, TaskPayload, TaskStatus};
use netq_engine::fake::{FakeExecutor, FakeStateReader};
use netq_engine::{RunnerConfig, TaskRunner};
use netq_store::{Database, NewTask, WorkerIdentity};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct NoPeering;

impl netq_core::StateReader for NoPeering {
    fn peering_connections(
        &self,
        _region: &str,
        _vpc_id: &str,
    ) -> Result<Vec<netq_core::PeeringConnection>, netq_core::StateError> {
        Ok(Vec::new())
    }
}

fn open_worker(dir: &TempDir, name: &str) -> Database {
    Database::open(dir.path().join("netq.db"), WorkerIdentity::new(name)).unwrap()
}

fn payload_json(vpc_id: &str) -> TaskPayload {
    // Producers submit payloads as JSON; parse one the way the API would.
    serde_json::from_str(&format!(
        r#"{{"UpdateLogging":{{"vpc_id":"{}","region":"us-east-1"}}}}"#,
        vpc_id
    ))
    .unwrap()
}

/// The canonical fairness scenario: T1 and T2 both need vpc_x, T3 needs
/// vpc_y. While T1 is running, T2 may not jump the queue, but T3 may.
#[test]
fn fifo_fairness_across_three_workers() {
    let dir = TempDir::new().unwrap();
    let worker_a = open_worker(&dir, "worker-a");
    let worker_b = open_worker(&dir, "worker-b");
    let worker_c = open_worker(&dir, "worker-c");

    let t1 = worker_a
        .add_task(NewTask::new("t1", payload_json("vpc_x")))
        .unwrap();
    let t2 = worker_a
        .add_task(NewTask::new("t2", payload_json("vpc_x")))
        .unwrap();
    let t3 = worker_a
        .add_task(NewTask::new("t3", payload_json("vpc_y")))
        .unwrap();

    // Worker A gets T1, the oldest schedulable task.
    let (a_task, mut a_locks) = worker_a.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(a_task.id(), t1.id);
    assert!(a_locks.has_lock(&Target::vpc("vpc_x")));

    // Worker B must skip T2 (T1 holds vpc_x) and gets T3.
    let (b_task, mut b_locks) = worker_b.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(b_task.id(), t3.id);

    // Nothing further is schedulable while T1 holds vpc_x.
    assert!(worker_c.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    // T1 finishes; worker C now gets T2.
    a_task.set_status(TaskStatus::Successful).unwrap();
    worker_a.release_task(t1.id).unwrap();
    a_locks.release_all();

    let (c_task, mut c_locks) = worker_c.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(c_task.id(), t2.id);

    worker_b.release_task(t3.id).unwrap();
    b_locks.release_all();
    worker_c.release_task(t2.id).unwrap();
    c_locks.release_all();
}

/// Two runner processes drain a queue of tasks that all contend on one
/// VPC. Every task runs exactly once and ends Successful; nothing is left
/// reserved or locked.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contending_runners_each_task_runs_exactly_once() {
    let dir = TempDir::new().unwrap();
    let producer = open_worker(&dir, "producer");

    let total = 8;
    let mut ids = Vec::new();
    for i in 0..total {
        let record = producer
            .add_task(NewTask::new(format!("task {}", i), payload_json("vpc-shared")))
            .unwrap();
        ids.push(record.id);
    }

    let mut executors = Vec::new();
    let mut handles = Vec::new();
    for name in ["worker-a", "worker-b"] {
        let db = open_worker(&dir, name);
        let executor = Arc::new(FakeExecutor::new());
        executor.set_delay(Duration::from_millis(5));
        executors.push(Arc::clone(&executor));
        let runner = TaskRunner::new(
            db.clone(),
            executor,
            Arc::new(FakeStateReader::new()),
            RunnerConfig {
                parallelism: 2,
                poll_interval: Duration::from_millis(20),
            },
        );
        handles.push(tokio::spawn(async move {
            // Keep polling until every task is done; contention on the
            // shared VPC makes "no task" a normal intermediate answer.
            loop {
                match runner.run_once().await {
                    Ok(true) => {}
                    Ok(false) => {
                        let stats = db.task_stats().unwrap();
                        if stats.num_queued == 0 && stats.num_reserved == 0 {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(err) => panic!("runner error: {}", err),
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = HashSet::new();
    let mut executed_total = 0;
    for executor in &executors {
        for id in executor.executed() {
            executed_total += 1;
            assert!(seen.insert(id), "task {} ran more than once", id);
        }
    }
    assert_eq!(executed_total, total);

    for id in ids {
        assert_eq!(producer.get_task(id).unwrap().status, TaskStatus::Successful);
    }
    assert!(producer.held_locks().unwrap().is_empty());
    assert_eq!(producer.task_stats().unwrap().num_reserved, 0);
}

/// Draining for maintenance: allow-none stops new reservations while the
/// reserved count drains, and allow-only lets a single named worker through.
#[test]
fn admission_gate_controls_a_worker_fleet() {
    let dir = TempDir::new().unwrap();
    let worker_a = open_worker(&dir, "worker-a");
    let worker_b = open_worker(&dir, "worker-b");

    worker_a
        .add_task(NewTask::new("one", payload_json("vpc-1")))
        .unwrap();
    worker_a
        .add_task(NewTask::new("two", payload_json("vpc-2")))
        .unwrap();

    // A reserves, then the operator stops the queue.
    let (task, mut locks) = worker_a.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    worker_a.allow_no_workers().unwrap();

    // No one can reserve, but the in-flight task is untouched.
    assert!(worker_a.reserve_next_queued_task(&NoPeering).unwrap().is_none());
    assert!(worker_b.reserve_next_queued_task(&NoPeering).unwrap().is_none());
    assert_eq!(worker_a.task_stats().unwrap().num_reserved, 1);

    // The in-flight task finishes; the reserved count drains to zero.
    task.set_status(TaskStatus::Successful).unwrap();
    worker_a.release_task(task.id()).unwrap();
    locks.release_all();
    assert_eq!(worker_a.task_stats().unwrap().num_reserved, 0);

    // Only worker-b is let back in.
    worker_a.allow_only_worker("worker-b").unwrap();
    assert!(worker_a.reserve_next_queued_task(&NoPeering).unwrap().is_none());
    let (b_task, mut b_locks) = worker_b.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(b_task.description(), "two");
    worker_b.release_task(b_task.id()).unwrap();
    b_locks.release_all();
}

/// A crashed worker leaks its locks; the queue stays blocked until an
/// operator clears them, then work resumes.
#[test]
fn operator_recovers_locks_leaked_by_a_crash() {
    let dir = TempDir::new().unwrap();
    let crashed = open_worker(&dir, "worker-a");
    let survivor = open_worker(&dir, "worker-b");

    crashed
        .add_task(NewTask::new("task", payload_json("vpc-1")))
        .unwrap();

    let (task, locks) = crashed.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    let task_id = task.id();
    // The process dies without releasing anything.
    std::mem::forget(locks);
    drop(task);
    drop(crashed);

    // The task's targets are still held, so nothing is schedulable.
    assert!(survivor.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    // Operator recovery: release the reservation and clear the leaked locks.
    survivor.release_task(task_id).unwrap();
    let held: Vec<Target> = survivor
        .held_locks()
        .unwrap()
        .into_iter()
        .map(|l| l.target)
        .collect();
    assert!(!held.is_empty());
    survivor.clear_locks(&held).unwrap();

    let (retry, mut retry_locks) = survivor.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(retry.id(), task_id);
    survivor.release_task(retry.id()).unwrap();
    retry_locks.release_all();
}

/// A dependency chain executes in order through the runner, and the
/// dependent only runs after its prerequisite succeeded.
#[tokio::test]
async fn dependency_chain_runs_in_order() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");
    let executor = Arc::new(FakeExecutor::new());
    let runner = TaskRunner::new(
        db.clone(),
        Arc::clone(&executor),
        Arc::new(FakeStateReader::new()),
        RunnerConfig {
            parallelism: 1,
            poll_interval: Duration::from_millis(20),
        },
    );

    let create = db
        .add_task(NewTask::new("create", payload_json("vpc-1")))
        .unwrap();
    let configure = db
        .add_task(NewTask::new("configure", payload_json("vpc-1")).depends_on(create.id))
        .unwrap();
    let verify = db
        .add_task(NewTask::new("verify", payload_json("vpc-1")).depends_on(configure.id))
        .unwrap();

    while runner.run_once().await.unwrap() {}

    assert_eq!(executor.executed(), vec![create.id, configure.id, verify.id]);
    assert_eq!(db.get_task(verify.id).unwrap().status, TaskStatus::Successful);
}
