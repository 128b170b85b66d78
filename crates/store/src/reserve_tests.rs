// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::db::{Database, WorkerIdentity};
use crate::error::StoreError;
use crate::tasks::NewTask;
use netq_core::{
    PeeringConnection, StateError, StateReader, Target, TaskPayload, TaskStatus, UpdateLogging,
    UpdateNetworking,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct NoPeering;

impl StateReader for NoPeering {
    fn peering_connections(
        &self,
        _region: &str,
        _vpc_id: &str,
    ) -> Result<Vec<PeeringConnection>, StateError> {
        Ok(Vec::new())
    }
}

fn open_worker(dir: &TempDir, name: &str) -> Database {
    Database::open(dir.path().join("netq.db"), WorkerIdentity::new(name)).unwrap()
}

fn logging_payload(vpc_id: &str) -> TaskPayload {
    TaskPayload::UpdateLogging(UpdateLogging {
        vpc_id: vpc_id.to_string(),
        region: "us-east-1".to_string(),
    })
}

fn networking_payload(vpc_id: &str) -> TaskPayload {
    TaskPayload::UpdateNetworking(UpdateNetworking {
        vpc_id: vpc_id.to_string(),
        region: "us-east-1".to_string(),
        connect_public: true,
        connect_private: false,
        peering: Vec::new(),
    })
}

#[test]
fn empty_queue_reserves_nothing() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");
    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());
}

#[test]
fn reserving_grants_task_and_locks() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    let record = db
        .add_task(NewTask::new("task", logging_payload("vpc-1")))
        .unwrap();
    let (task, mut locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();

    assert_eq!(task.id(), record.id);
    assert!(locks.has_lock(&Target::vpc("vpc-1")));
    assert!(locks.has_lock(&Target::task(record.id)));

    // The reservation row names this worker.
    let reserved_by: String = {
        let conn = db.conn();
        conn.query_row(
            "SELECT reserved_by FROM task_reservation WHERE task_id = ?1",
            [record.id.0],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(reserved_by, db.worker_id());

    db.release_task(record.id).unwrap();
    locks.release_all();
}

#[test]
fn reserved_task_is_not_handed_out_twice() {
    let dir = TempDir::new().unwrap();
    let a = open_worker(&dir, "worker-a");
    let b = open_worker(&dir, "worker-b");

    let record = a
        .add_task(NewTask::new("task", logging_payload("vpc-1")))
        .unwrap();
    let (_task, mut locks) = a.reserve_next_queued_task(&NoPeering).unwrap().unwrap();

    // The task is still Queued, but its identity target is held.
    assert_eq!(a.get_task(record.id).unwrap().status, TaskStatus::Queued);
    assert!(b.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    locks.release_all();
}

#[test]
fn tasks_are_reserved_oldest_first() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    let first = db
        .add_task(NewTask::new("first", logging_payload("vpc-1")))
        .unwrap();
    let second = db
        .add_task(NewTask::new("second", logging_payload("vpc-2")))
        .unwrap();

    let (task, mut locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(task.id(), first.id);
    let (next, mut next_locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(next.id(), second.id);

    locks.release_all();
    next_locks.release_all();
}

#[test]
fn dependent_task_waits_for_its_prerequisite() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    let prereq = db
        .add_task(NewTask::new("prereq", logging_payload("vpc-1")))
        .unwrap();
    let dependent = db
        .add_task(NewTask::new("dependent", logging_payload("vpc-2")).depends_on(prereq.id))
        .unwrap();

    // Prerequisite is Queued: only the prerequisite is schedulable.
    let (task, mut locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(task.id(), prereq.id);

    // Prerequisite now InProgress: the dependent still waits.
    task.set_status(TaskStatus::InProgress).unwrap();
    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    // Terminal prerequisite unblocks the dependent.
    task.set_status(TaskStatus::Successful).unwrap();
    db.release_task(prereq.id).unwrap();
    locks.release_all();

    let (next, mut next_locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(next.id(), dependent.id);
    next_locks.release_all();
}

#[test]
fn admission_gate_denies_other_workers() {
    let dir = TempDir::new().unwrap();
    let a = open_worker(&dir, "worker-a");
    let b = open_worker(&dir, "worker-b");

    a.add_task(NewTask::new("task", logging_payload("vpc-1")))
        .unwrap();
    a.allow_only_worker("worker-b").unwrap();

    assert!(a.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    let (task, mut locks) = b.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(task.description(), "task");
    locks.release_all();
}

#[test]
fn allow_none_denies_everyone() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    db.add_task(NewTask::new("task", logging_payload("vpc-1")))
        .unwrap();
    db.allow_no_workers().unwrap();
    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    db.allow_all_workers().unwrap();
    let (_, mut locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    locks.release_all();
}

#[test]
fn blocked_head_task_does_not_starve() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");
    let third_party = open_worker(&dir, "worker-z");

    let t1 = db
        .add_task(NewTask::new("t1", logging_payload("vpc-x")))
        .unwrap();
    let t2 = db
        .add_task(NewTask::new("t2", logging_payload("vpc-x")))
        .unwrap();
    let t3 = db
        .add_task(NewTask::new("t3", logging_payload("vpc-y")))
        .unwrap();

    // A third party holds vpc-x, so t1 is blocked on contention, t2 is
    // blocked transitively, and only t3 may run.
    let mut held = third_party.acquire_locks(&[Target::vpc("vpc-x")]).unwrap();

    let (task, mut locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(task.id(), t3.id);

    // Nothing else is schedulable while vpc-x stays held.
    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    // Releasing vpc-x lets t1 (not t2) go next.
    held.release_all();
    let (next, mut next_locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(next.id(), t1.id);

    // t2 is still blocked by t1's lock on vpc-x.
    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());

    db.release_task(t1.id).unwrap();
    next_locks.release_all();
    let (last, mut last_locks) = db.reserve_next_queued_task(&NoPeering).unwrap().unwrap();
    assert_eq!(last.id(), t2.id);

    db.release_task(t2.id).unwrap();
    db.release_task(t3.id).unwrap();
    last_locks.release_all();
    locks.release_all();
}

#[test]
fn later_task_may_not_take_a_blocked_target() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");
    let third_party = open_worker(&dir, "worker-z");

    // t1 needs vpc-a and vpc-b; t2 needs only vpc-b, which is free. If t2
    // ran, t1 could be starved indefinitely, so t2 must wait.
    let mut held = third_party.acquire_locks(&[Target::vpc("vpc-a")]).unwrap();

    db.add_task(NewTask::new(
        "t1",
        TaskPayload::UpdateNetworking(UpdateNetworking {
            vpc_id: "vpc-a".to_string(),
            region: "us-east-1".to_string(),
            connect_public: false,
            connect_private: false,
            peering: vec![netq_core::payload::PeeringRequest {
                other_vpc_id: "vpc-b".to_string(),
                other_region: "us-east-1".to_string(),
            }],
        }),
    ))
    .unwrap();
    db.add_task(NewTask::new("t2", networking_payload("vpc-b")))
        .unwrap();

    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());
    assert!(db.held_locks().unwrap().len() == 1);

    held.release_all();
}

#[test]
fn changed_targets_after_acquisition_skip_the_task() {
    // State whose answer grows between the first and second resolution,
    // simulating a peering connection added between the read and the lock.
    struct ShiftingState {
        calls: AtomicUsize,
    }

    impl StateReader for ShiftingState {
        fn peering_connections(
            &self,
            _region: &str,
            vpc_id: &str,
        ) -> Result<Vec<PeeringConnection>, StateError> {
            if vpc_id != "vpc-race" {
                return Ok(Vec::new());
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![PeeringConnection {
                    requester_vpc_id: "vpc-race".to_string(),
                    accepter_vpc_id: "vpc-surprise".to_string(),
                }])
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    let racy = db
        .add_task(NewTask::new("racy", networking_payload("vpc-race")))
        .unwrap();
    let stable = db
        .add_task(NewTask::new("stable", logging_payload("vpc-2")))
        .unwrap();

    let state = ShiftingState {
        calls: AtomicUsize::new(0),
    };
    let (task, mut locks) = db.reserve_next_queued_task(&state).unwrap().unwrap();

    // The racy task was skipped this scan and left no locks behind.
    assert_eq!(task.id(), stable.id);
    let held = db.held_locks().unwrap();
    assert!(held.iter().all(|l| l.target != Target::vpc("vpc-race")));

    db.release_task(stable.id).unwrap();
    locks.release_all();

    // Next scan resolves consistently and the racy task runs.
    let (next, mut next_locks) = db.reserve_next_queued_task(&state).unwrap().unwrap();
    assert_eq!(next.id(), racy.id);
    assert!(next_locks.has_lock(&Target::vpc("vpc-surprise")));
    next_locks.release_all();
}

#[test]
fn resolver_errors_abort_with_no_locks_held() {
    struct FailingState;

    impl StateReader for FailingState {
        fn peering_connections(
            &self,
            _region: &str,
            vpc_id: &str,
        ) -> Result<Vec<PeeringConnection>, StateError> {
            Err(StateError::VpcNotFound(vpc_id.to_string()))
        }
    }

    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    db.add_task(NewTask::new("task", networking_payload("vpc-1")))
        .unwrap();

    let err = db.reserve_next_queued_task(&FailingState).unwrap_err();
    assert!(matches!(err, StoreError::Resolve(_)));
    assert!(db.held_locks().unwrap().is_empty());
    let reserved: i64 = {
        let conn = db.conn();
        conn.query_row("SELECT COUNT(*) FROM task_reservation", [], |r| r.get(0))
            .unwrap()
    };
    assert_eq!(reserved, 0);
}

#[test]
fn cancelled_and_terminal_tasks_are_never_candidates() {
    let dir = TempDir::new().unwrap();
    let db = open_worker(&dir, "worker-a");

    db.add_task(
        NewTask::new("cancelled", logging_payload("vpc-1")).with_status(TaskStatus::Cancelled),
    )
    .unwrap();
    db.add_task(
        NewTask::new("failed", logging_payload("vpc-2")).with_status(TaskStatus::Failed),
    )
    .unwrap();

    assert!(db.reserve_next_queued_task(&NoPeering).unwrap().is_none());
}
