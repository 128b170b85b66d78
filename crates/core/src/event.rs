// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Change events published by the store
//!
//! Idle workers subscribe to these to wake without tight polling. Delivery
//! is best-effort; polling remains the correctness fallback.

use crate::task::{TaskId, TaskStatus};

/// A change in the shared store that may make new work schedulable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// A task row was inserted.
    TaskQueued { id: TaskId, status: TaskStatus },
    /// A lock row was deleted.
    LockReleased { lock_id: i64 },
    /// The admission policy changed.
    PolicyChanged { only_worker_name: Option<String> },
}

impl QueueEvent {
    /// The event's wire name on the notification channel, e.g. `task_12_0`,
    /// `lock_4`, `only_allow_worker-a`.
    pub fn channel_payload(&self) -> String {
        match self {
            QueueEvent::TaskQueued { id, status } => {
                format!("task_{}_{}", id, status.code())
            }
            QueueEvent::LockReleased { lock_id } => format!("lock_{}", lock_id),
            QueueEvent::PolicyChanged { only_worker_name } => match only_worker_name {
                Some(name) => format!("only_allow_{}", name),
                None => "only_allow_".to_string(),
            },
        }
    }
}
