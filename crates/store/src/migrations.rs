// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema migrations
//!
//! Applied on [`Database::open`](crate::Database::open). Each entry runs at
//! most once; the applied count is tracked in the `migration` table. New
//! schema changes append entries, never edit existing ones.

use crate::error::StoreError;
use rusqlite::{Connection, TransactionBehavior};

const MIGRATIONS: &[&[&str]] = &[
    // Task queue core
    &[
        "CREATE TABLE batch_task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        "CREATE TABLE task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            data TEXT NOT NULL,
            status INTEGER NOT NULL,
            depends_on_task_id INTEGER REFERENCES task(id),
            batch_task_id INTEGER REFERENCES batch_task(id),
            added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        "CREATE TABLE task_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES task(id),
            added_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            message TEXT NOT NULL
        )",
    ],
    // Reservations: which worker currently owns an in-flight task
    &["CREATE TABLE task_reservation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL UNIQUE REFERENCES task(id),
            reserved_by TEXT NOT NULL,
            reserved_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )"],
    // Locks: the UNIQUE constraint on target_id is the mutual-exclusion
    // invariant; acquiring is a single constrained insert
    &["CREATE TABLE task_lock (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_id TEXT NOT NULL,
            target_id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )"],
    // Admission gate. enforce_one_row prevents more than one row from being
    // added; only_worker_name NULL means any worker is allowed, and no row
    // at all means no worker is.
    &[
        "CREATE TABLE allow_tasks (
            enforce_one_row INTEGER PRIMARY KEY DEFAULT 1 CHECK (enforce_one_row = 1),
            only_worker_name TEXT
        )",
        "INSERT INTO allow_tasks (only_worker_name) VALUES (NULL)",
    ],
];

pub(crate) fn apply(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS migration (
            idx INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
        [],
    )?;
    let applied: i64 = tx.query_row("SELECT COUNT(*) FROM migration", [], |row| row.get(0))?;
    for (idx, steps) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        for step in *steps {
            tx.execute(step, [])?;
        }
        tx.execute("INSERT INTO migration (idx) VALUES (?1)", [idx as i64])?;
        tracing::debug!(migration = idx, "applied migration");
    }
    tx.commit()?;
    Ok(())
}
