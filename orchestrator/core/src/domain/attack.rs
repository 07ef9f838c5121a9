// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Aggregate
//!
//! One `AttackRecord` exists per started fault-injection attack. The record is
//! the single source of truth for status and stop queries; it is mutated only
//! by the attack's supervisor task and by the stop/rollback path, always
//! through [`AttackRecord::transition`] so the lifecycle stays monotonic.
//!
//! ## Lifecycle
//!
//! ```text
//! starting ─► running ─► completed | failed | crashed | cancelled
//!                │         partially_recovered | rolled_back | force_killed
//!                └─► rolling_back ─► rolled_back | rollback_failed
//!                                    partially_recovered | completed | force_killed
//! ```
//!
//! Terminal states only move again through [`AttackRecord::begin_rollback`],
//! which is reserved for an explicit stop or a scheduled automatic rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::parameters::AttackParameters;
use crate::domain::progress::AttackProgress;
use crate::domain::sanitize::sanitize_message;
use crate::domain::verification::Verification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttackId(pub Uuid);

impl AttackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable 31-bit key used as the default advisory lock id for this attack.
    pub fn advisory_key(&self) -> i64 {
        let bytes = self.0.as_bytes();
        let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        i64::from(raw & 0x7fff_ffff)
    }

    /// First eight hex characters, used for thread and file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for AttackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttackId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a runner executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Pure external I/O multiplexed on the shared tokio scheduler.
    Cooperative,
    /// A database session held open across the whole attack; owns an OS thread.
    DedicatedThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    #[serde(alias = "db_pool")]
    PoolFlood,
    #[serde(alias = "api_crash")]
    ProcessCrash,
    #[serde(alias = "env_vars")]
    EnvCorrupt,
    #[serde(alias = "long_transactions")]
    LongTransaction,
    #[serde(alias = "migrations")]
    MigrationCorrupt,
    #[serde(alias = "rate_limit")]
    RateLimitFlood,
}

impl AttackKind {
    pub const ALL: [AttackKind; 6] = [
        AttackKind::PoolFlood,
        AttackKind::ProcessCrash,
        AttackKind::EnvCorrupt,
        AttackKind::LongTransaction,
        AttackKind::MigrationCorrupt,
        AttackKind::RateLimitFlood,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::PoolFlood => "pool_flood",
            AttackKind::ProcessCrash => "process_crash",
            AttackKind::EnvCorrupt => "env_corrupt",
            AttackKind::LongTransaction => "long_transaction",
            AttackKind::MigrationCorrupt => "migration_corrupt",
            AttackKind::RateLimitFlood => "rate_limit_flood",
        }
    }

    /// Route name used by the first generation of the chaos server.
    pub fn legacy_name(&self) -> &'static str {
        match self {
            AttackKind::PoolFlood => "db_pool",
            AttackKind::ProcessCrash => "api_crash",
            AttackKind::EnvCorrupt => "env_vars",
            AttackKind::LongTransaction => "long_transactions",
            AttackKind::MigrationCorrupt => "migrations",
            AttackKind::RateLimitFlood => "rate_limit",
        }
    }

    pub fn placement(&self) -> Placement {
        match self {
            AttackKind::LongTransaction => Placement::DedicatedThread,
            _ => Placement::Cooperative,
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttackKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.legacy_name() == s)
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackState {
    Starting,
    Running,
    Completed,
    Failed,
    Crashed,
    RollingBack,
    RolledBack,
    RollbackFailed,
    ForceKilled,
    PartiallyRecovered,
    Cancelled,
}

impl AttackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackState::Starting => "starting",
            AttackState::Running => "running",
            AttackState::Completed => "completed",
            AttackState::Failed => "failed",
            AttackState::Crashed => "crashed",
            AttackState::RollingBack => "rolling_back",
            AttackState::RolledBack => "rolled_back",
            AttackState::RollbackFailed => "rollback_failed",
            AttackState::ForceKilled => "force_killed",
            AttackState::PartiallyRecovered => "partially_recovered",
            AttackState::Cancelled => "cancelled",
        }
    }

    /// The runner (or rollback) still owns the record.
    pub fn is_active(&self) -> bool {
        matches!(self, AttackState::Starting | AttackState::Running | AttackState::RollingBack)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Terminal states whose stored error is surfaced by a stop request.
    pub fn is_error(&self) -> bool {
        matches!(self, AttackState::Failed | AttackState::RollbackFailed)
    }

    pub fn can_transition_to(&self, next: AttackState) -> bool {
        use AttackState::*;
        matches!(
            (self, next),
            (Starting, Running | Failed | Cancelled)
                | (
                    Running,
                    Completed
                        | Failed
                        | Crashed
                        | RollingBack
                        | RolledBack
                        | PartiallyRecovered
                        | Cancelled
                        | ForceKilled
                )
                | (
                    RollingBack,
                    RolledBack | RollbackFailed | PartiallyRecovered | Completed | ForceKilled
                )
        )
    }

    /// States from which an explicit stop or a scheduled rollback may begin.
    pub fn can_begin_rollback(&self) -> bool {
        use AttackState::*;
        matches!(
            self,
            Running | Completed | Crashed | Cancelled | PartiallyRecovered | Failed | RollbackFailed
        )
    }
}

impl fmt::Display for AttackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: AttackState, to: AttackState },

    #[error("invalid parameter '{field}': {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("unknown attack type: {0}")]
    UnknownKind(String),

    #[error("record of type {actual} does not carry {expected} progress")]
    ProgressMismatch { expected: AttackKind, actual: AttackKind },
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DomainError::InvalidParameter { field, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttackRecord {
    pub id: AttackId,
    #[serde(rename = "type")]
    pub kind: AttackKind,
    state: AttackState,
    pub parameters: AttackParameters,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rolled_back_at: Option<DateTime<Utc>>,
    pub progress: AttackProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_verification: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback_error: Option<String>,
}

impl AttackRecord {
    pub fn new(id: AttackId, parameters: AttackParameters) -> Self {
        let kind = parameters.kind();
        Self {
            id,
            kind,
            state: AttackState::Starting,
            parameters,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rolled_back_at: None,
            progress: AttackProgress::for_kind(kind),
            verification: None,
            recovery_verification: None,
            error: None,
            rollback_error: None,
        }
    }

    pub fn state(&self) -> AttackState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn rolled_back_at(&self) -> Option<DateTime<Utc>> {
        self.rolled_back_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn rollback_error(&self) -> Option<&str> {
        self.rollback_error.as_deref()
    }

    /// Move along the state machine. Timestamps are set once: `started_at` on
    /// the first entry into `running`, `finished_at` on the first terminal state.
    pub fn transition(&mut self, to: AttackState) -> Result<AttackState, DomainError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidTransition { from, to });
        }
        self.state = to;
        let now = Utc::now();
        if to == AttackState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        // Any settled rollback counts, including automatic recovery to `completed`
        let rollback_settled = from == AttackState::RollingBack && to != AttackState::RollbackFailed;
        if to == AttackState::RolledBack || rollback_settled {
            self.rolled_back_at = Some(now);
        }
        Ok(from)
    }

    /// Enter `rolling_back` from a running or settled state.
    pub fn begin_rollback(&mut self) -> Result<AttackState, DomainError> {
        let from = self.state;
        if !from.can_begin_rollback() {
            return Err(DomainError::InvalidTransition {
                from,
                to: AttackState::RollingBack,
            });
        }
        self.state = AttackState::RollingBack;
        Ok(from)
    }

    pub fn fail(&mut self, message: &str) -> Result<AttackState, DomainError> {
        let from = self.transition(AttackState::Failed)?;
        self.error = Some(sanitize_message(message));
        Ok(from)
    }

    pub fn fail_rollback(&mut self, message: &str) -> Result<AttackState, DomainError> {
        let from = self.transition(AttackState::RollbackFailed)?;
        self.rollback_error = Some(sanitize_message(message));
        Ok(from)
    }

    /// Terminal with no damage left for a stop to undo.
    pub fn is_evictable(&self) -> bool {
        self.state.is_terminal() && !(self.parameters.has_rollback() && self.progress.needs_rollback())
    }

    /// The message a stop request surfaces for an error state.
    pub fn failure_message(&self) -> String {
        self.rollback_error
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("unknown error")
            .to_string()
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or(now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    pub fn summary(&self) -> AttackSummary {
        AttackSummary {
            id: self.id,
            kind: self.kind,
            state: self.state,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackSummary {
    pub id: AttackId,
    #[serde(rename = "type")]
    pub kind: AttackKind,
    pub state: AttackState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parameters::{AttackParameters, PoolFloodParams};

    fn pool_record() -> AttackRecord {
        AttackRecord::new(
            AttackId::new(),
            AttackParameters::PoolFlood(PoolFloodParams {
                target_base_url: "http://localhost:8000".to_string(),
                connections: 5,
                hold_seconds: 2,
            }),
        )
    }

    #[test]
    fn test_kind_accepts_legacy_names() {
        assert_eq!("db_pool".parse::<AttackKind>().unwrap(), AttackKind::PoolFlood);
        assert_eq!("rate_limit_flood".parse::<AttackKind>().unwrap(), AttackKind::RateLimitFlood);
        assert_eq!("migrations".parse::<AttackKind>().unwrap(), AttackKind::MigrationCorrupt);
        assert!("nope".parse::<AttackKind>().is_err());
    }

    #[test]
    fn test_only_lock_holder_owns_a_thread() {
        for kind in AttackKind::ALL {
            let expected = if kind == AttackKind::LongTransaction {
                Placement::DedicatedThread
            } else {
                Placement::Cooperative
            };
            assert_eq!(kind.placement(), expected);
        }
    }

    #[test]
    fn test_new_record_starts_in_starting() {
        let record = pool_record();
        assert_eq!(record.state(), AttackState::Starting);
        assert_eq!(record.kind, AttackKind::PoolFlood);
        assert!(record.started_at().is_none());
        assert!(record.finished_at().is_none());
    }

    #[test]
    fn test_transition_sets_timestamps_once() {
        let mut record = pool_record();
        record.transition(AttackState::Running).unwrap();
        let started = record.started_at().unwrap();
        record.transition(AttackState::Completed).unwrap();
        let finished = record.finished_at().unwrap();
        assert!(finished >= started);

        record.begin_rollback().unwrap();
        record.transition(AttackState::RolledBack).unwrap();
        assert_eq!(record.started_at(), Some(started));
        assert_eq!(record.finished_at(), Some(finished));
        assert!(record.rolled_back_at().is_some());
    }

    #[test]
    fn test_terminal_states_reject_plain_transitions() {
        let mut record = pool_record();
        record.transition(AttackState::Running).unwrap();
        record.transition(AttackState::Cancelled).unwrap();
        let err = record.transition(AttackState::Running).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: AttackState::Cancelled,
                to: AttackState::Running
            }
        );
    }

    #[test]
    fn test_starting_cannot_begin_rollback() {
        let mut record = pool_record();
        assert!(record.begin_rollback().is_err());
        record.transition(AttackState::Cancelled).unwrap();
        assert!(record.begin_rollback().is_ok());
        assert_eq!(record.state(), AttackState::RollingBack);
    }

    #[test]
    fn test_rolled_back_is_final_for_rollback() {
        let mut record = pool_record();
        record.transition(AttackState::Running).unwrap();
        record.begin_rollback().unwrap();
        record.transition(AttackState::RolledBack).unwrap();
        assert!(record.begin_rollback().is_err());
        assert!(record.transition(AttackState::ForceKilled).is_err());
    }

    #[test]
    fn test_fail_sanitizes_message() {
        let mut record = pool_record();
        record
            .fail("could not connect to postgresql://admin:hunter2@db:5432/app")
            .unwrap();
        assert_eq!(record.state(), AttackState::Failed);
        let error = record.error().unwrap();
        assert!(!error.contains("hunter2"));
        assert!(error.contains("db:5432/app"));
    }

    #[test]
    fn test_every_state_serializes_as_snake_case() {
        let json = serde_json::to_string(&AttackState::PartiallyRecovered).unwrap();
        assert_eq!(json, "\"partially_recovered\"");
        let json = serde_json::to_string(&AttackState::RollbackFailed).unwrap();
        assert_eq!(json, "\"rollback_failed\"");
    }

    #[test]
    fn test_advisory_key_is_positive_and_stable() {
        let id = AttackId::new();
        assert_eq!(id.advisory_key(), id.advisory_key());
        assert!(id.advisory_key() >= 0);
        assert!(id.advisory_key() < (1 << 31));
    }
}
