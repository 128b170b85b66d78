// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared database handle and worker identity

use crate::error::StoreError;
use crate::migrations;
use netq_core::QueueEvent;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

/// How long a writer blocks on the coarse serialization point before giving
/// up with a busy error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CAPACITY: usize = 256;

/// The identity a worker process presents to the store.
///
/// `id` is unique per process and owns reservations and locks; `name` is the
/// operator-facing name the admission gate matches against, and is shared by
/// all replicas of a deployment.
#[derive(Clone, Debug)]
pub struct WorkerIdentity {
    id: String,
    name: String,
}

impl WorkerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        WorkerIdentity {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to the shared store.
///
/// Cheap to clone; clones share one connection. Independent worker processes
/// each open their own handle against the same database file and coordinate
/// only through it.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    worker: Arc<WorkerIdentity>,
    events: broadcast::Sender<QueueEvent>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply pending
    /// migrations.
    pub fn open(path: impl AsRef<Path>, worker: WorkerIdentity) -> Result<Self, StoreError> {
        let mut conn = Connection::open(path)?;
        // WAL keeps readers unblocked while a reservation scan holds the
        // write lock; the busy timeout makes concurrent scans block on the
        // serialization point instead of erroring.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::apply(&mut conn)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
            worker: Arc::new(worker),
            events,
        })
    }

    pub fn worker_id(&self) -> &str {
        self.worker.id()
    }

    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }

    /// Subscribe to change events. Events are an in-process wake-up
    /// optimization only; a subscriber that misses events (or another
    /// process entirely) still makes progress by polling.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: QueueEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}
