// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Target Database Port
//!
//! Operations the runners perform against the system under test's database:
//! holding locks inside a long-lived session, observing who is blocked,
//! probing advisory locks, and reading or rewriting the schema-version marker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::attack::{AttackId, AttackState};
use crate::domain::parameters::{DatabaseUrl, LockType, LongTransactionParams};

#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("database operation timed out after {0}ms")]
    Timeout(u64),
}

/// What a lock session holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    Table { table: String },
    Rows { table: String, count: u32 },
    Advisory { lock_id: i64 },
}

impl LockTarget {
    pub fn from_params(params: &LongTransactionParams, id: AttackId) -> Self {
        match params.lock_type {
            LockType::TableLock => LockTarget::Table {
                table: params.target_table.clone(),
            },
            LockType::RowLock => LockTarget::Rows {
                table: params.target_table.clone(),
                count: params.lock_count,
            },
            LockType::AdvisoryLock => LockTarget::Advisory {
                lock_id: params.advisory_lock_id.unwrap_or_else(|| id.advisory_key()),
            },
        }
    }

    pub fn lock_mode(&self) -> &'static str {
        match self {
            LockTarget::Table { .. } => "ACCESS EXCLUSIVE",
            LockTarget::Rows { .. } => "ROW (FOR UPDATE)",
            LockTarget::Advisory { .. } => "ADVISORY",
        }
    }

    pub fn table(&self) -> Option<&str> {
        match self {
            LockTarget::Table { table } | LockTarget::Rows { table, .. } => Some(table),
            LockTarget::Advisory { .. } => None,
        }
    }

    pub fn advisory_id(&self) -> Option<i64> {
        match self {
            LockTarget::Advisory { lock_id } => Some(*lock_id),
            _ => None,
        }
    }

    /// Advisory holds have nothing to undo and end with COMMIT when they run
    /// their course; table and row holds always end with ROLLBACK.
    pub fn commits_on_release(&self) -> bool {
        matches!(self, LockTarget::Advisory { .. })
    }
}

/// Result of taking the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAcquisition {
    /// Rows locked by a row hold; `None` for table and advisory holds.
    pub rows_locked: Option<u64>,
}

/// A session blocked by the attack's lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedQuery {
    pub pid: i32,
    pub usename: Option<String>,
    pub query: Option<String>,
    pub state: Option<String>,
}

/// One advisory-lock probe taken from an independent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockProbe {
    pub lock_id: i64,
    pub lock_acquired: bool,
    pub attack_state: AttackState,
    pub probed_at: DateTime<Utc>,
}

/// A single database session kept open for the lifetime of a lock hold.
#[async_trait]
pub trait LockSession: Send {
    async fn backend_pid(&mut self) -> Result<i32, DatabaseError>;
    async fn begin(&mut self) -> Result<(), DatabaseError>;
    async fn acquire(&mut self, target: &LockTarget) -> Result<LockAcquisition, DatabaseError>;
    /// Release the lock and end the transaction.
    async fn release(&mut self, target: &LockTarget, commit: bool) -> Result<(), DatabaseError>;
    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait TargetDatabase: Send + Sync {
    async fn open_lock_session(&self) -> Result<Box<dyn LockSession>, DatabaseError>;

    /// Sessions currently waiting on a lock held by `blocking_pid`.
    async fn blocked_queries(&self, blocking_pid: i32) -> Result<Vec<BlockedQuery>, DatabaseError>;

    /// Terminate a backend from the outside. `Ok(false)` if it was already gone.
    async fn terminate_backend(&self, pid: i32) -> Result<bool, DatabaseError>;

    /// Try the advisory lock without waiting; releases it again if acquired.
    async fn try_advisory_lock(&self, lock_id: i64) -> Result<bool, DatabaseError>;

    /// `None` when the marker table is missing or empty.
    async fn read_schema_version(&self) -> Result<Option<String>, DatabaseError>;

    /// Replace the marker row; `None` deletes it.
    async fn write_schema_version(&self, version: Option<&str>) -> Result<(), DatabaseError>;
}

/// Opens handles to target databases by URL.
pub trait DatabaseProvider: Send + Sync {
    fn connect(&self, url: &DatabaseUrl) -> Arc<dyn TargetDatabase>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lock_type: LockType) -> LongTransactionParams {
        LongTransactionParams {
            database_url: DatabaseUrl::new("postgres://localhost/target").unwrap(),
            lock_type,
            duration_seconds: None,
            target_table: "items".to_string(),
            lock_count: 10,
            advisory_lock_id: None,
        }
    }

    #[test]
    fn test_advisory_id_defaults_to_attack_key() {
        let id = AttackId::new();
        let target = LockTarget::from_params(&params(LockType::AdvisoryLock), id);
        assert_eq!(target.advisory_id(), Some(id.advisory_key()));
        assert!(target.commits_on_release());
    }

    #[test]
    fn test_explicit_advisory_id_wins() {
        let mut p = params(LockType::AdvisoryLock);
        p.advisory_lock_id = Some(42);
        let target = LockTarget::from_params(&p, AttackId::new());
        assert_eq!(target, LockTarget::Advisory { lock_id: 42 });
    }

    #[test]
    fn test_row_lock_carries_count() {
        let target = LockTarget::from_params(&params(LockType::RowLock), AttackId::new());
        assert_eq!(
            target,
            LockTarget::Rows {
                table: "items".to_string(),
                count: 10
            }
        );
        assert_eq!(target.lock_mode(), "ROW (FOR UPDATE)");
        assert!(!target.commits_on_release());
    }
}
