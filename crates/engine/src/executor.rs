// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor boundary
//!
//! Task bodies live outside this crate. The runtime hands an executor the
//! reserved task, its payload, and the lock set covering every target the
//! payload resolved to.

use async_trait::async_trait;
use netq_core::TaskPayload;
use netq_store::{LockSet, TaskHandle};
use thiserror::Error;

/// Failure of a task body. The runtime logs the message to the task's log
/// and marks the task Failed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExecuteError(pub String);

impl From<String> for ExecuteError {
    fn from(msg: String) -> Self {
        ExecuteError(msg)
    }
}

impl From<&str> for ExecuteError {
    fn from(msg: &str) -> Self {
        ExecuteError(msg.to_string())
    }
}

/// Runs task bodies.
///
/// The runtime sets the task InProgress before calling `execute` and sets it
/// Successful after an `Ok` return, so an executor only needs to do the work
/// and report failure by returning `Err` (or calling [`TaskHandle::fail`]
/// itself, which latches the task against the Successful transition).
///
/// `locks` already covers every target the payload resolved to. An executor
/// that discovers it needs another target mid-task may try
/// [`LockSet::acquire_additional`], accepting that it can fail with
/// contention.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        task: &TaskHandle,
        payload: &TaskPayload,
        locks: &mut LockSet,
    ) -> Result<(), ExecuteError>;
}
