// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable task records, handles, batches, and queue statistics
//!
//! Task rows are never deleted; history accumulates in the per-task log.
//! A [`TaskHandle`] is held by the worker executing a task and carries the
//! fail latch: once [`TaskHandle::fail`] has run, no further status change
//! is permitted through that handle.

use crate::admission::{policy_on, AdmissionPolicy};
use crate::db::Database;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use netq_core::{QueueEvent, TaskId, TaskPayload, TaskStatus};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Page size for task and batch listings.
pub const MAX_TASKS_RETURNED: usize = 10;

pub(crate) const TASK_COLUMNS: &str =
    "task.id, task.description, task.data, task.status, task.depends_on_task_id, \
     task.batch_task_id, task.added_at";

/// A task row as stored.
#[derive(Clone, Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub description: String,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub depends_on: Option<TaskId>,
    pub batch_id: Option<i64>,
    pub added_at: DateTime<Utc>,
}

/// One line of a task's append-only log.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// A batch row with its member tasks, newest first.
#[derive(Clone, Debug)]
pub struct BatchRecord {
    pub id: i64,
    pub description: String,
    pub added_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
}

/// Point-in-time queue statistics.
#[derive(Clone, Debug)]
pub struct TaskStats {
    pub oldest_not_done_added_at: Option<DateTime<Utc>>,
    pub num_queued: usize,
    pub num_in_progress: usize,
    pub num_reserved: usize,
    pub policy: AdmissionPolicy,
}

/// A task to be inserted.
#[derive(Clone, Debug)]
pub struct NewTask {
    description: String,
    payload: TaskPayload,
    status: TaskStatus,
    depends_on: Option<TaskId>,
    batch_id: Option<i64>,
}

impl NewTask {
    pub fn new(description: impl Into<String>, payload: TaskPayload) -> Self {
        NewTask {
            description: description.into(),
            payload,
            status: TaskStatus::Queued,
            depends_on: None,
            batch_id: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Gate this task on another finishing first.
    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.depends_on = Some(id);
        self
    }

    pub fn in_batch(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

pub(crate) fn task_from_row(row: &Row<'_>) -> Result<TaskRecord, rusqlite::Error> {
    let payload_json: String = row.get(2)?;
    let payload: TaskPayload = serde_json::from_str(&payload_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let status_code: i64 = row.get(3)?;
    let status = TaskStatus::from_code(status_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Integer,
            format!("unknown task status code {}", status_code).into(),
        )
    })?;
    Ok(TaskRecord {
        id: TaskId(row.get(0)?),
        description: row.get(1)?,
        payload,
        status,
        depends_on: row.get::<_, Option<i64>>(4)?.map(TaskId),
        batch_id: row.get(5)?,
        added_at: row.get(6)?,
    })
}

impl Database {
    /// Insert a task and publish its queued event.
    pub fn add_task(&self, new: NewTask) -> Result<TaskRecord, StoreError> {
        let payload_json = serde_json::to_string(&new.payload)?;
        let record = {
            let conn = self.conn();
            conn.query_row(
                &format!(
                    "INSERT INTO task (description, data, status, depends_on_task_id, batch_task_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     RETURNING {}",
                    TASK_COLUMNS
                ),
                params![
                    new.description,
                    payload_json,
                    new.status.code(),
                    new.depends_on.map(|t| t.0),
                    new.batch_id,
                ],
                task_from_row,
            )?
        };
        self.publish(QueueEvent::TaskQueued {
            id: record.id,
            status: record.status,
        });
        Ok(record)
    }

    pub fn get_task(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM task WHERE task.id = ?1", TASK_COLUMNS),
            params![id.0],
            task_from_row,
        )
        .optional()?
        .ok_or(StoreError::TaskNotFound(id))
    }

    /// Recent tasks, newest first. Returns at most [`MAX_TASKS_RETURNED`]
    /// records plus a flag saying whether more exist before the cursor.
    pub fn get_tasks(&self, before: Option<TaskId>) -> Result<(Vec<TaskRecord>, bool), StoreError> {
        let conn = self.conn();
        let mut sql = format!("SELECT {} FROM task", TASK_COLUMNS);
        if before.is_some() {
            sql.push_str(" WHERE task.added_at < (SELECT added_at FROM task WHERE id = ?2)");
        }
        sql.push_str(" ORDER BY task.added_at DESC, task.id DESC LIMIT ?1");
        let limit = (MAX_TASKS_RETURNED + 1) as i64;
        let mut stmt = conn.prepare(&sql)?;
        let rows = match before {
            Some(cursor) => stmt.query_map(params![limit, cursor.0], task_from_row)?,
            None => stmt.query_map(params![limit], task_from_row)?,
        };
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        let more = tasks.len() > MAX_TASKS_RETURNED;
        tasks.truncate(MAX_TASKS_RETURNED);
        Ok((tasks, more))
    }

    /// Obtain a handle for a task, as the worker contract hands out after a
    /// reservation. The fail latch starts unlatched.
    pub fn task_handle(&self, id: TaskId) -> Result<TaskHandle, StoreError> {
        let record = self.get_task(id)?;
        Ok(TaskHandle::new(self.clone(), record))
    }

    /// Delete the reservation for a task, making the worker slot visible as
    /// free in the stats. Idempotent.
    pub fn release_task(&self, id: TaskId) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM task_reservation WHERE task_id = ?1",
            params![id.0],
        )?;
        Ok(())
    }

    /// Cancel queued tasks. Serializes against reservation so a task cannot
    /// be claimed mid-cancel; ids that are currently reserved are skipped,
    /// and only Queued rows are flipped to Cancelled.
    pub fn cancel_tasks(&self, ids: &[TaskId]) -> Result<(), StoreError> {
        let mut guard = self.conn();
        let tx = guard.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let reserved: HashSet<i64> = {
            let mut stmt = tx.prepare("SELECT task_id FROM task_reservation")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut set = HashSet::new();
            for row in rows {
                set.insert(row?);
            }
            set
        };

        for id in ids {
            if reserved.contains(&id.0) {
                tracing::info!(task = %id, "task is reserved; not cancelling");
                continue;
            }
            tx.execute(
                "UPDATE task SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![
                    TaskStatus::Cancelled.code(),
                    id.0,
                    TaskStatus::Queued.code()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn log_entries(&self, id: TaskId) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT added_at, message FROM task_log WHERE task_id = ?1 ORDER BY added_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok(LogEntry {
                time: row.get(0)?,
                message: row.get(1)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn add_batch_task(&self, description: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        let id = conn.query_row(
            "INSERT INTO batch_task (description) VALUES (?1) RETURNING id",
            params![description],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_batch_task(&self, id: i64) -> Result<BatchRecord, StoreError> {
        let conn = self.conn();
        let header = conn
            .query_row(
                "SELECT id, description, added_at FROM batch_task WHERE id = ?1",
                params![id],
                batch_header_from_row,
            )
            .optional()?
            .ok_or(StoreError::BatchNotFound(id))?;
        let tasks = batch_members(&conn, id)?;
        Ok(BatchRecord { tasks, ..header })
    }

    /// Recent batches, newest first, each with its member tasks.
    pub fn get_batch_tasks(
        &self,
        before: Option<i64>,
    ) -> Result<(Vec<BatchRecord>, bool), StoreError> {
        let conn = self.conn();
        let mut sql = "SELECT id, description, added_at FROM batch_task".to_string();
        if before.is_some() {
            sql.push_str(" WHERE added_at < (SELECT added_at FROM batch_task WHERE id = ?2)");
        }
        sql.push_str(" ORDER BY added_at DESC, id DESC LIMIT ?1");
        let limit = (MAX_TASKS_RETURNED + 1) as i64;
        let mut stmt = conn.prepare(&sql)?;
        let rows = match before {
            Some(cursor) => stmt.query_map(params![limit, cursor], batch_header_from_row)?,
            None => stmt.query_map(params![limit], batch_header_from_row)?,
        };
        let mut batches = Vec::new();
        for row in rows {
            batches.push(row?);
        }
        let more = batches.len() > MAX_TASKS_RETURNED;
        batches.truncate(MAX_TASKS_RETURNED);
        for batch in &mut batches {
            batch.tasks = batch_members(&conn, batch.id)?;
        }
        Ok((batches, more))
    }

    pub fn task_stats(&self) -> Result<TaskStats, StoreError> {
        let conn = self.conn();
        let oldest: Option<DateTime<Utc>> = conn
            .query_row(
                "SELECT added_at FROM task WHERE status = ?1 OR status = ?2
                 ORDER BY added_at ASC LIMIT 1",
                params![TaskStatus::Queued.code(), TaskStatus::InProgress.code()],
                |row| row.get(0),
            )
            .optional()?;
        let num_queued: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task WHERE status = ?1",
            params![TaskStatus::Queued.code()],
            |row| row.get(0),
        )?;
        let num_in_progress: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task WHERE status = ?1",
            params![TaskStatus::InProgress.code()],
            |row| row.get(0),
        )?;
        let num_reserved: i64 =
            conn.query_row("SELECT COUNT(*) FROM task_reservation", [], |row| {
                row.get(0)
            })?;
        let policy = policy_on(&conn)?;
        Ok(TaskStats {
            oldest_not_done_added_at: oldest,
            num_queued: num_queued as usize,
            num_in_progress: num_in_progress as usize,
            num_reserved: num_reserved as usize,
            policy,
        })
    }
}

fn batch_header_from_row(row: &Row<'_>) -> Result<BatchRecord, rusqlite::Error> {
    Ok(BatchRecord {
        id: row.get(0)?,
        description: row.get(1)?,
        added_at: row.get(2)?,
        tasks: Vec::new(),
    })
}

fn batch_members(
    conn: &rusqlite::Connection,
    batch_id: i64,
) -> Result<Vec<TaskRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM task WHERE task.batch_task_id = ?1
         ORDER BY task.added_at DESC, task.id DESC",
        TASK_COLUMNS
    ))?;
    let rows = stmt.query_map(params![batch_id], task_from_row)?;
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?);
    }
    Ok(tasks)
}

/// Handle to a task held by the worker executing it.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    db: Database,
    record: TaskRecord,
    failed: Arc<Mutex<bool>>,
}

impl TaskHandle {
    pub(crate) fn new(db: Database, record: TaskRecord) -> Self {
        TaskHandle {
            db,
            record,
            failed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.record.id
    }

    pub fn description(&self) -> &str {
        &self.record.description
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.record.payload
    }

    pub fn record(&self) -> &TaskRecord {
        &self.record
    }

    /// Append a line to the task's log. Logging never fails the caller.
    pub fn log(&self, message: &str) {
        let conn = self.db.conn();
        let result = conn.execute(
            "INSERT INTO task_log (task_id, message) VALUES (?1, ?2)",
            params![self.record.id.0, message],
        );
        if let Err(err) = result {
            tracing::error!(task = %self.record.id, error = %err, "error writing task log");
        }
    }

    pub fn log_entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.db.log_entries(self.record.id)
    }

    /// Update the stored status. Returns [`StoreError::AlreadyFailed`] once
    /// the handle is fail-latched.
    pub fn set_status(&self, status: TaskStatus) -> Result<(), StoreError> {
        let failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        if *failed {
            return Err(StoreError::AlreadyFailed(self.record.id));
        }
        self.update_status(status)
    }

    /// Log `message`, mark the task Failed, and latch: every later
    /// `set_status` on this handle fails.
    pub fn fail(&self, message: &str) -> Result<(), StoreError> {
        let mut failed = self.failed.lock().unwrap_or_else(|e| e.into_inner());
        *failed = true;
        self.log(message);
        self.update_status(TaskStatus::Failed)
    }

    /// The prerequisite task, if this task has one.
    pub fn depends_on(&self) -> Result<Option<TaskRecord>, StoreError> {
        match self.record.depends_on {
            Some(id) => Ok(Some(self.db.get_task(id)?)),
            None => Ok(None),
        }
    }

    fn update_status(&self, status: TaskStatus) -> Result<(), StoreError> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE task SET status = ?1 WHERE id = ?2",
            params![status.code(), self.record.id.0],
        )?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
