// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted locks and the LockSet capability
//!
//! A lock is a `(target, holder)` row with a uniqueness constraint on the
//! target, so acquiring is a single constrained insert that either succeeds
//! or reveals contention. Locks never expire; see the operator commands for
//! clearing locks leaked by a crashed worker.

use crate::db::Database;
use crate::error::{lock_insert_error, StoreError};
use chrono::{DateTime, Utc};
use netq_core::{QueueEvent, Target};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// A currently held lock row.
#[derive(Clone, Debug)]
pub struct LockRecord {
    pub id: i64,
    pub worker_id: String,
    pub target: Target,
    pub created_at: DateTime<Utc>,
}

/// The set of locks one caller currently holds.
///
/// Acquire a LockSet before starting operations involving any controlled
/// target. You must call [`LockSet::release_all`] when done; locks are never
/// released automatically by the store. As a safety net for panicking code
/// paths, dropping a set that still holds targets releases them with a
/// warning.
pub struct LockSet {
    db: Option<Database>,
    targets: Vec<Target>,
}

impl LockSet {
    pub(crate) fn from_parts(db: Database, targets: Vec<Target>) -> Self {
        LockSet {
            db: Some(db),
            targets,
        }
    }

    /// A LockSet for tests that does not persist anything.
    pub fn fake(targets: Vec<Target>) -> Self {
        LockSet { db: None, targets }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn has_lock(&self, target: &Target) -> bool {
        self.targets.contains(target)
    }

    /// Attempt to acquire one more lock. This may fail with contention, so
    /// in general it should only be used before any work has been done, or
    /// when no one else could have already acquired the target.
    pub fn acquire_additional(&mut self, target: Target) -> Result<(), StoreError> {
        if self.has_lock(&target) {
            return Ok(());
        }
        if let Some(db) = &self.db {
            let conn = db.conn();
            acquire_on(&conn, db.worker_id(), &target)?;
        }
        self.targets.push(target);
        Ok(())
    }

    /// Release a single target. Releasing a target that is not held is a
    /// logged no-op.
    pub fn release(&mut self, target: &Target) {
        if let Some(db) = &self.db {
            let released = {
                let conn = db.conn();
                release_on(&conn, db.worker_id(), target)
            };
            if let Some(lock_id) = released {
                db.publish(QueueEvent::LockReleased { lock_id });
            }
        }
        self.targets.retain(|t| t != target);
    }

    /// Release every held target. Safe to call more than once.
    pub fn release_all(&mut self) {
        let targets = std::mem::take(&mut self.targets);
        let Some(db) = &self.db else {
            return;
        };
        let released: Vec<i64> = {
            let conn = db.conn();
            targets
                .iter()
                .filter_map(|t| release_on(&conn, db.worker_id(), t))
                .collect()
        };
        for lock_id in released {
            db.publish(QueueEvent::LockReleased { lock_id });
        }
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        if self.db.is_some() && !self.targets.is_empty() {
            tracing::warn!(
                targets = ?self.targets,
                "lock set dropped while still holding targets; releasing"
            );
            self.release_all();
        }
    }
}

impl std::fmt::Debug for LockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSet")
            .field("targets", &self.targets)
            .field("fake", &self.db.is_none())
            .finish()
    }
}

impl Database {
    /// Acquire every target, or none of them.
    ///
    /// Failure caused by a held target is [`StoreError::AlreadyLocked`]
    /// naming that target; any locks acquired first are released before
    /// returning, so the caller never ends up with partial locks.
    pub fn acquire_locks(&self, targets: &[Target]) -> Result<LockSet, StoreError> {
        let acquired = {
            let conn = self.conn();
            acquire_all_on(&conn, self.worker_id(), targets)?
        };
        Ok(LockSet::from_parts(self.clone(), acquired))
    }

    /// All currently held locks, oldest first.
    pub fn held_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, worker_id, target_id, created_at FROM task_lock ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LockRecord {
                id: row.get(0)?,
                worker_id: row.get(1)?,
                target: Target::from_raw(row.get::<_, String>(2)?),
                created_at: row.get(3)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Forcibly delete lock rows regardless of holder. Operator recovery for
    /// locks leaked by a crashed worker; never called by the scheduler.
    pub fn clear_locks(&self, targets: &[Target]) -> Result<usize, StoreError> {
        let mut released = Vec::new();
        {
            let conn = self.conn();
            for target in targets {
                let lock_id: Option<i64> = conn
                    .query_row(
                        "DELETE FROM task_lock WHERE target_id = ?1 RETURNING id",
                        params![target.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match lock_id {
                    Some(id) => released.push(id),
                    None => tracing::warn!(target = %target, "no lock held on target"),
                }
            }
        }
        let cleared = released.len();
        for lock_id in released {
            self.publish(QueueEvent::LockReleased { lock_id });
        }
        Ok(cleared)
    }
}

/// Insert a lock row for `target`. A unique violation becomes
/// [`StoreError::AlreadyLocked`].
pub(crate) fn acquire_on(
    conn: &Connection,
    worker_id: &str,
    target: &Target,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO task_lock (worker_id, target_id) VALUES (?1, ?2)",
        params![worker_id, target.as_str()],
    )
    .map_err(|err| lock_insert_error(target, err))?;
    Ok(())
}

/// Delete this worker's lock row for `target`, returning the deleted row id.
/// Errors are logged, not returned; release must not fail its caller.
pub(crate) fn release_on(conn: &Connection, worker_id: &str, target: &Target) -> Option<i64> {
    let result = conn
        .query_row(
            "DELETE FROM task_lock WHERE worker_id = ?1 AND target_id = ?2 RETURNING id",
            params![worker_id, target.as_str()],
            |row| row.get(0),
        )
        .optional();
    match result {
        Ok(Some(id)) => Some(id),
        Ok(None) => {
            tracing::debug!(target = %target, "lock was already released");
            None
        }
        Err(err) => {
            tracing::error!(target = %target, error = %err, "error releasing lock");
            None
        }
    }
}

/// Acquire every target in order, deduplicating repeats, rolling back all
/// prior acquisitions on the first failure. Returns the deduplicated list
/// actually acquired.
pub(crate) fn acquire_all_on(
    conn: &Connection,
    worker_id: &str,
    targets: &[Target],
) -> Result<Vec<Target>, StoreError> {
    // Fast path to fail without writing in most cases where the locks are
    // unavailable.
    if let Some(held) = first_held(conn, targets)? {
        return Err(StoreError::AlreadyLocked(held));
    }

    let mut acquired: Vec<Target> = Vec::new();
    for target in targets {
        if acquired.contains(target) {
            continue;
        }
        match acquire_on(conn, worker_id, target) {
            Ok(()) => acquired.push(target.clone()),
            Err(err) => {
                for held in &acquired {
                    release_on(conn, worker_id, held);
                }
                return Err(err);
            }
        }
    }
    Ok(acquired)
}

/// Release every listed target, returning the deleted lock row ids.
pub(crate) fn release_all_on(conn: &Connection, worker_id: &str, targets: &[Target]) -> Vec<i64> {
    targets
        .iter()
        .filter_map(|t| release_on(conn, worker_id, t))
        .collect()
}

fn first_held(conn: &Connection, targets: &[Target]) -> Result<Option<Target>, StoreError> {
    if targets.is_empty() {
        return Ok(None);
    }
    let placeholders = vec!["?"; targets.len()].join(", ");
    let sql = format!(
        "SELECT target_id FROM task_lock WHERE target_id IN ({}) LIMIT 1",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let held = stmt
        .query_row(
            params_from_iter(targets.iter().map(|t| t.as_str())),
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(held.map(Target::from_raw))
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
