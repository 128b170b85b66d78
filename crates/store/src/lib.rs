// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! netq-store: SQLite-backed store for tasks, locks, and the admission gate
//!
//! All coordination between worker processes goes through this store; there
//! is no in-process shared state for correctness. The store provides:
//! - Durable task records with an append-only per-task log
//! - Persisted mutual-exclusion locks with an atomic acquire
//! - The reservation scheduler ([`Database::reserve_next_queued_task`])
//! - The admission gate controlling which named workers may claim tasks

mod admission;
mod db;
mod error;
mod locks;
mod migrations;
mod reserve;
mod tasks;

pub use admission::AdmissionPolicy;
pub use db::{Database, WorkerIdentity};
pub use error::StoreError;
pub use locks::{LockRecord, LockSet};
pub use tasks::{
    BatchRecord, LogEntry, NewTask, TaskHandle, TaskRecord, TaskStats, MAX_TASKS_RETURNED,
};
