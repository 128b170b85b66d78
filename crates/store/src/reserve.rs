// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task reservation
//!
//! `reserve_next_queued_task` is the scheduling core: it scans queued,
//! unblocked tasks oldest first and hands the caller the first one whose
//! lock targets it can acquire, without letting a later task succeed on a
//! target an earlier still-blocked task also needs.

use crate::admission;
use crate::db::Database;
use crate::error::StoreError;
use crate::locks::{self, LockSet};
use crate::tasks::{task_from_row, TaskHandle, TaskRecord, TASK_COLUMNS};
use netq_core::{QueueEvent, StateReader, Target, TaskId, TaskStatus};
use rusqlite::{params, Transaction, TransactionBehavior};
use std::collections::HashMap;

impl Database {
    /// Reserve the next schedulable queued task for this worker.
    ///
    /// The whole scan runs inside one exclusive transaction, so reservation
    /// attempts are serialized across all workers; concurrent callers block
    /// on the store's busy timeout. Returns `Ok(None)` when the queue is
    /// empty, every candidate is blocked, or the admission gate denies this
    /// worker; callers cannot distinguish these.
    ///
    /// On success the reservation row and the task's locks are committed
    /// atomically, and the caller owns the returned [`LockSet`]: it must
    /// release it, and the reservation, when done with the task.
    ///
    /// `state` is read while the scan holds the store's connection, so a
    /// resolver must not call back into this database handle.
    pub fn reserve_next_queued_task(
        &self,
        state: &dyn StateReader,
    ) -> Result<Option<(TaskHandle, LockSet)>, StoreError> {
        let (record, targets, released) = {
            let mut guard = self.conn();
            let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !admission::worker_allowed_on(&tx, self.worker_name())? {
                tracing::info!(
                    worker = self.worker_name(),
                    "this worker is not allowed to work right now"
                );
                return Ok(None);
            }

            let candidates = queued_candidates(&tx)?;

            // Targets needed by an earlier task that could not run this
            // scan. A later task needing any of them must not jump ahead.
            let mut blocked: HashMap<Target, TaskId> = HashMap::new();
            let mut released: Vec<i64> = Vec::new();
            let mut selected: Option<(TaskRecord, Vec<Target>)> = None;

            for task in candidates {
                let mut targets = task.payload.lock_targets(state)?;
                targets.push(Target::task(task.id));
                tracing::debug!(task = %task.id, targets = ?targets, "task needs targets");

                if let Some((needed, earlier)) = targets
                    .iter()
                    .find_map(|t| blocked.get(t).map(|b| (t.clone(), *b)))
                {
                    tracing::debug!(
                        task = %task.id,
                        target = %needed,
                        blocked_task = %earlier,
                        "task needs a target an earlier blocked task needs too"
                    );
                    mark_blocked(&mut blocked, targets, task.id);
                    continue;
                }

                let acquired = match locks::acquire_all_on(&tx, self.worker_id(), &targets) {
                    Ok(acquired) => acquired,
                    Err(StoreError::AlreadyLocked(target)) => {
                        tracing::debug!(task = %task.id, target = %target, "cannot do task; target is locked");
                        mark_blocked(&mut blocked, targets, task.id);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                // The targets can depend on resource state, which may have
                // changed between resolving them and acquiring the locks.
                // Check again now that we hold the locks and no one else
                // should be writing that state.
                let refreshed = task.payload.lock_targets(state)?;
                if let Some(missing) = refreshed.iter().find(|t| !acquired.contains(*t)) {
                    tracing::warn!(
                        task = %task.id,
                        target = %missing,
                        "target is now needed but wasn't before; skipping task this scan"
                    );
                    released.extend(locks::release_all_on(&tx, self.worker_id(), &acquired));
                    continue;
                }

                selected = Some((task, acquired));
                break;
            }

            let Some((record, targets)) = selected else {
                tracing::debug!("no tasks to do");
                return Ok(None);
            };

            tx.execute(
                "INSERT INTO task_reservation (task_id, reserved_by) VALUES (?1, ?2)",
                params![record.id.0, self.worker_id()],
            )?;
            tx.commit()?;
            (record, targets, released)
        };

        for lock_id in released {
            self.publish(QueueEvent::LockReleased { lock_id });
        }
        tracing::info!(task = %record.id, description = %record.description, "selected task");
        let handle = TaskHandle::new(self.clone(), record);
        let lock_set = LockSet::from_parts(self.clone(), targets);
        Ok(Some((handle, lock_set)))
    }
}

fn mark_blocked(blocked: &mut HashMap<Target, TaskId>, targets: Vec<Target>, id: TaskId) {
    for target in targets {
        blocked.entry(target).or_insert(id);
    }
}

/// Queued tasks whose prerequisite (if any) is no longer pending, oldest
/// first.
fn queued_candidates(tx: &Transaction<'_>) -> Result<Vec<TaskRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM task
         LEFT JOIN task prereq ON prereq.id = task.depends_on_task_id
         WHERE task.status = ?1
           AND (task.depends_on_task_id IS NULL
                OR (prereq.status != ?1 AND prereq.status != ?2))
         ORDER BY task.added_at ASC, task.id ASC",
        TASK_COLUMNS
    );
    let mut stmt = tx.prepare(&sql)?;
    let rows = stmt.query_map(
        params![TaskStatus::Queued.code(), TaskStatus::InProgress.code()],
        task_from_row,
    )?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}

#[cfg(test)]
#[path = "reserve_tests.rs"]
mod tests;
