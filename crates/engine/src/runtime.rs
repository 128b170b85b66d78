// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime loop
//!
//! Mirrors the deployment model of the store: any number of runner
//! processes, each with a bounded number of task slots, all coordinating
//! only through the shared database. A runner reserves a task, performs it
//! on its own spawned task, and always releases the reservation and the
//! lock set afterwards, whatever the outcome.

use crate::executor::TaskExecutor;
use netq_core::{StateReader, TaskStatus};
use netq_store::{Database, LockSet, StoreError, TaskHandle};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Runner tuning.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How many tasks this process may perform concurrently.
    pub parallelism: usize,
    /// How long an idle runner waits before re-scanning the queue. Change
    /// events cut the wait short; polling is the correctness fallback for
    /// changes made by other processes.
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            parallelism: 4,
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// The reservation/execution loop of one worker process.
pub struct TaskRunner<E, S> {
    db: Database,
    executor: Arc<E>,
    state: Arc<S>,
    config: RunnerConfig,
}

impl<E, S> TaskRunner<E, S>
where
    E: TaskExecutor,
    S: StateReader + Send + Sync + 'static,
{
    pub fn new(db: Database, executor: Arc<E>, state: Arc<S>, config: RunnerConfig) -> Self {
        TaskRunner {
            db,
            executor,
            state,
            config,
        }
    }

    /// Reserve and perform at most one task, waiting for it to finish.
    /// Returns whether a task was found.
    pub async fn run_once(&self) -> Result<bool, RunnerError> {
        match self.db.reserve_next_queued_task(self.state.as_ref())? {
            Some((task, locks)) => {
                perform_task(self.db.clone(), Arc::clone(&self.executor), task, locks).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run until `shutdown` flips to true, then drain in-flight tasks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let slots = Arc::new(Semaphore::new(self.config.parallelism));
        let mut events = self.db.subscribe();

        loop {
            // Grab a free task slot before scanning.
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if *shutdown.borrow() {
                drop(permit);
                break;
            }

            match self.db.reserve_next_queued_task(self.state.as_ref()) {
                Ok(Some((task, locks))) => {
                    let db = self.db.clone();
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        perform_task(db, executor, task, locks).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    // Wait until something suggests a task might be
                    // available: a change event, the poll interval, or
                    // shutdown.
                    tokio::select! {
                        _ = events.recv() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    drop(permit);
                    tracing::error!(error = %err, "error getting next task");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!("waiting for workers to finish");
        let _ = Arc::clone(&slots)
            .acquire_many_owned(self.config.parallelism as u32)
            .await;
        tracing::info!("all workers done");
    }
}

/// Perform one reserved task, then release the reservation and the locks.
async fn perform_task<E: TaskExecutor>(
    db: Database,
    executor: Arc<E>,
    task: TaskHandle,
    locks: LockSet,
) {
    let task_id = task.id();
    let locks = execute_guarded(executor, &task, locks).await;
    tracing::info!(task = %task_id, "finished task");

    if let Err(err) = db.release_task(task_id) {
        tracing::error!(task = %task_id, error = %err, "error releasing task");
    }
    if let Some(mut locks) = locks {
        locks.release_all();
    }
}

/// Check the prerequisite, mark the task InProgress, and run the executor
/// inside its own spawned task so a panic is contained and becomes a task
/// failure. Returns the lock set unless a panic already dropped it (the
/// drop releases the locks).
async fn execute_guarded<E: TaskExecutor>(
    executor: Arc<E>,
    task: &TaskHandle,
    locks: LockSet,
) -> Option<LockSet> {
    match task.depends_on() {
        Ok(None) => {}
        Ok(Some(prereq)) => {
            if prereq.status != TaskStatus::Successful {
                fail_task(
                    task,
                    &format!("prerequisite task \"{}\" did not succeed", prereq.description),
                );
                return Some(locks);
            }
        }
        Err(err) => {
            fail_task(task, &format!("error checking prerequisite task status: {}", err));
            return Some(locks);
        }
    }

    if let Err(err) = task.set_status(TaskStatus::InProgress) {
        tracing::error!(task = %task.id(), error = %err, "error starting task");
        return Some(locks);
    }

    let inner = task.clone();
    let handle = tokio::spawn(async move {
        let mut locks = locks;
        let payload = inner.payload().clone();
        let result = executor.execute(&inner, &payload, &mut locks).await;
        (result, locks)
    });

    match handle.await {
        Ok((Ok(()), locks)) => {
            if let Err(err) = task.set_status(TaskStatus::Successful) {
                // The executor latched the task Failed itself.
                tracing::debug!(task = %task.id(), error = %err, "leaving task status unchanged");
            }
            Some(locks)
        }
        Ok((Err(err), locks)) => {
            fail_task(task, &format!("task failed: {}", err));
            Some(locks)
        }
        Err(join_err) => {
            if join_err.is_panic() {
                fail_task(task, "unexpected panic while executing task");
            } else {
                tracing::error!(task = %task.id(), "task execution was cancelled");
            }
            None
        }
    }
}

fn fail_task(task: &TaskHandle, message: &str) {
    if let Err(err) = task.fail(message) {
        tracing::error!(task = %task.id(), error = %err, "error failing task");
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
