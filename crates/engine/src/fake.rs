// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fakes for testing runners without cloud APIs

#![allow(clippy::panic)]

use crate::executor::{ExecuteError, TaskExecutor};
use async_trait::async_trait;
use netq_core::{PeeringConnection, StateError, StateReader, TaskId, TaskPayload};
use netq_store::{LockSet, TaskHandle};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory state reader backed by a peering map.
#[derive(Default)]
pub struct FakeStateReader {
    peering: Mutex<HashMap<String, Vec<PeeringConnection>>>,
}

impl FakeStateReader {
    pub fn new() -> Self {
        FakeStateReader::default()
    }

    pub fn add_peering(&self, vpc_id: &str, requester: &str, accepter: &str) {
        self.peering
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(vpc_id.to_string())
            .or_default()
            .push(PeeringConnection {
                requester_vpc_id: requester.to_string(),
                accepter_vpc_id: accepter.to_string(),
            });
    }
}

impl StateReader for FakeStateReader {
    fn peering_connections(
        &self,
        _region: &str,
        vpc_id: &str,
    ) -> Result<Vec<PeeringConnection>, StateError> {
        Ok(self
            .peering
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(vpc_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Scriptable executor that records what it ran.
///
/// Outcomes are keyed by task description: descriptions registered with
/// [`fail_on`](FakeExecutor::fail_on) return an error, ones registered with
/// [`panic_on`](FakeExecutor::panic_on) panic mid-execution. Everything else
/// succeeds.
#[derive(Default)]
pub struct FakeExecutor {
    executed: Mutex<Vec<TaskId>>,
    fail_descriptions: Mutex<HashSet<String>>,
    panic_descriptions: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        FakeExecutor::default()
    }

    pub fn fail_on(&self, description: &str) {
        self.fail_descriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(description.to_string());
    }

    pub fn panic_on(&self, description: &str) {
        self.panic_descriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(description.to_string());
    }

    /// Make every execution take this long. Useful for exercising the
    /// parallelism slots and shutdown draining.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Ids of tasks that ran to completion, in completion order.
    pub fn executed(&self) -> Vec<TaskId> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TaskExecutor for FakeExecutor {
    async fn execute(
        &self,
        task: &TaskHandle,
        _payload: &TaskPayload,
        _locks: &mut LockSet,
    ) -> Result<(), ExecuteError> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let description = task.description().to_string();
        if self
            .panic_descriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&description)
        {
            panic!("fake executor told to panic on {}", description);
        }
        if self
            .fail_descriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&description)
        {
            return Err(ExecuteError::from(format!(
                "fake executor told to fail on {}",
                description
            )));
        }

        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task.id());
        Ok(())
    }
}
