// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission gate
//!
//! A single persisted row decides which named workers may reserve tasks.
//! Policy changes serialize against the reservation path, so once one of
//! these calls returns, no disallowed worker will start any further task.
//! Changes never affect tasks that are already reserved.

use crate::db::Database;
use crate::error::StoreError;
use netq_core::QueueEvent;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Which workers the gate currently admits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionPolicy {
    AllowAll,
    AllowOnly(String),
    AllowNone,
}

impl std::fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionPolicy::AllowAll => write!(f, "all workers allowed"),
            AdmissionPolicy::AllowOnly(name) => write!(f, "only workers named \"{}\"", name),
            AdmissionPolicy::AllowNone => write!(f, "no workers allowed"),
        }
    }
}

impl Database {
    pub fn allow_all_workers(&self) -> Result<(), StoreError> {
        self.set_policy(None)
    }

    pub fn allow_only_worker(&self, name: &str) -> Result<(), StoreError> {
        self.set_policy(Some(name))
    }

    fn set_policy(&self, only_worker_name: Option<&str>) -> Result<(), StoreError> {
        {
            let mut guard = self.conn();
            let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO allow_tasks (enforce_one_row, only_worker_name) VALUES (1, ?1)
                 ON CONFLICT (enforce_one_row) DO UPDATE SET only_worker_name = ?1",
                params![only_worker_name],
            )?;
            tx.commit()?;
        }
        self.publish(QueueEvent::PolicyChanged {
            only_worker_name: only_worker_name.map(String::from),
        });
        Ok(())
    }

    /// Remove the policy row entirely: no worker may reserve until a new
    /// policy is written.
    pub fn allow_no_workers(&self) -> Result<(), StoreError> {
        {
            let mut guard = self.conn();
            let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM allow_tasks", [])?;
            tx.commit()?;
        }
        self.publish(QueueEvent::PolicyChanged {
            only_worker_name: None,
        });
        Ok(())
    }

    pub fn admission_policy(&self) -> Result<AdmissionPolicy, StoreError> {
        let conn = self.conn();
        policy_on(&conn)
    }
}

pub(crate) fn policy_on(conn: &Connection) -> Result<AdmissionPolicy, StoreError> {
    let row: Option<Option<String>> = conn
        .query_row("SELECT only_worker_name FROM allow_tasks LIMIT 1", [], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match row {
        None => AdmissionPolicy::AllowNone,
        Some(None) => AdmissionPolicy::AllowAll,
        Some(Some(name)) => AdmissionPolicy::AllowOnly(name),
    })
}

pub(crate) fn worker_allowed_on(conn: &Connection, worker_name: &str) -> Result<bool, StoreError> {
    let allowed: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM allow_tasks
             WHERE only_worker_name IS NULL OR only_worker_name = ?1
             LIMIT 1",
            params![worker_name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(allowed.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WorkerIdentity;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path().join("netq.db"), WorkerIdentity::new("worker-a")).unwrap()
    }

    #[test]
    fn fresh_database_allows_all() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.admission_policy().unwrap(), AdmissionPolicy::AllowAll);
    }

    #[test]
    fn allow_only_replaces_policy() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.allow_only_worker("worker-b").unwrap();
        assert_eq!(
            db.admission_policy().unwrap(),
            AdmissionPolicy::AllowOnly("worker-b".to_string())
        );

        db.allow_all_workers().unwrap();
        assert_eq!(db.admission_policy().unwrap(), AdmissionPolicy::AllowAll);
    }

    #[test]
    fn allow_none_deletes_the_row() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.allow_no_workers().unwrap();
        assert_eq!(db.admission_policy().unwrap(), AdmissionPolicy::AllowNone);

        // A later allow-only reinstates the single row.
        db.allow_only_worker("worker-b").unwrap();
        assert_eq!(
            db.admission_policy().unwrap(),
            AdmissionPolicy::AllowOnly("worker-b".to_string())
        );
    }

    #[test]
    fn worker_allowed_matches_name_or_null() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        {
            let conn = db.conn();
            assert!(worker_allowed_on(&conn, "anyone").unwrap());
        }

        db.allow_only_worker("worker-b").unwrap();
        {
            let conn = db.conn();
            assert!(worker_allowed_on(&conn, "worker-b").unwrap());
            assert!(!worker_allowed_on(&conn, "worker-a").unwrap());
        }

        db.allow_no_workers().unwrap();
        {
            let conn = db.conn();
            assert!(!worker_allowed_on(&conn, "worker-b").unwrap());
        }
    }

    #[test]
    fn policy_change_publishes_event() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let mut events = db.subscribe();

        db.allow_only_worker("worker-b").unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.channel_payload(), "only_allow_worker-b");

        db.allow_no_workers().unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.channel_payload(), "only_allow_");
    }
}
