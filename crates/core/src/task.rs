// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task identifiers and statuses

use serde::{Deserialize, Serialize};

/// Unique identifier for a task. Monotonic, assigned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        TaskId(id)
    }
}

/// The lifecycle status of a task.
///
/// Stored as an integer code; the codes are part of the persisted schema and
/// must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    InProgress,
    Successful,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn code(self) -> i64 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Successful => 2,
            TaskStatus::Failed => 3,
            TaskStatus::Cancelled => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Queued),
            1 => Some(TaskStatus::InProgress),
            2 => Some(TaskStatus::Successful),
            3 => Some(TaskStatus::Failed),
            4 => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the task has finished one way or another.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Successful | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Queued => "Queued",
            TaskStatus::InProgress => "In progress",
            TaskStatus::Successful => "Successful",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}
