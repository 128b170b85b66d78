// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutual-exclusion targets
//!
//! A target names a resource that at most one holder may work on at a time.
//! It denotes the resource itself, never the holder.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};

/// Opaque key identifying a resource requiring mutual exclusion.
///
/// Equality is exact string match, so any two callers computing the same
/// logical resource must go through the same constructor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// The named VPC's state, issues, and deletion marker.
    pub fn vpc(vpc_id: &str) -> Self {
        Target(format!("vpc_{}", vpc_id))
    }

    /// A single task's own identity. Every scheduled task holds this, so a
    /// task can never be reserved twice.
    pub fn task(task_id: TaskId) -> Self {
        Target(format!("task_{}", task_id))
    }

    /// The write path to the external IP address management system.
    pub fn ipam_write() -> Self {
        Target("ipam_write".to_string())
    }

    /// The write path to the external DNS API.
    pub fn dns_api() -> Self {
        Target("dns_api".to_string())
    }

    /// Creating a resource share for another account.
    pub fn share_add() -> Self {
        Target("ram_add".to_string())
    }

    /// Wrap a raw key read back from the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Target(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
