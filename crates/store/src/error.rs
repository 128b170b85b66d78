// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error taxonomy

use netq_core::{ResolveError, Target, TaskId};
use thiserror::Error;

/// Errors from the store.
///
/// [`StoreError::AlreadyLocked`] is expected, recoverable contention; the
/// scheduler handles it internally and it never surfaces from a reservation.
/// Everything else is an infrastructure or logic error for the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("target \"{0}\" was already locked")]
    AlreadyLocked(Target),

    /// A status update was attempted on a fail-latched task.
    #[error("task {0} already failed")]
    AlreadyFailed(TaskId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("batch task {0} not found")]
    BatchNotFound(i64),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("error getting targets for task: {0}")]
    Resolve(#[from] ResolveError),
}

impl StoreError {
    /// Whether this error is lock contention rather than a real failure.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::AlreadyLocked(_))
    }
}

/// Translate an insert failure on `task_lock` into the error taxonomy: a
/// unique-constraint violation means the target is held by someone else.
pub(crate) fn lock_insert_error(target: &Target, err: rusqlite::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::AlreadyLocked(target.clone())
    } else {
        StoreError::Sqlite(err)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
