// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Repository
//!
//! Persistence contract for the `AttackRecord` aggregate, implemented in
//! `crate::infrastructure::repositories`.
//!
//! Updates are closures applied under the store's lock to a copy of the
//! record; the copy replaces the stored record only when the closure succeeds.
//! Concurrent readers therefore see either the old or the new record, never a
//! half-applied one.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::attack::{AttackId, AttackKind, AttackRecord, DomainError};

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("attack not found: {0}")]
    NotFound(AttackId),

    #[error("attack already exists: {0}")]
    AlreadyExists(AttackId),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Eviction rules for terminal records.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub max_records: usize,
}

pub trait AttackRepository: Send + Sync {
    fn insert(&self, record: AttackRecord) -> Result<(), RepositoryError>;

    fn get(&self, id: AttackId) -> Result<Option<AttackRecord>, RepositoryError>;

    /// Apply `change` atomically and return the stored result.
    fn update(
        &self,
        id: AttackId,
        change: &mut dyn FnMut(&mut AttackRecord) -> Result<(), DomainError>,
    ) -> Result<AttackRecord, RepositoryError>;

    /// Records of one kind (or all), oldest first.
    fn list(&self, kind: Option<AttackKind>) -> Result<Vec<AttackRecord>, RepositoryError>;

    /// Drop terminal records past the TTL, then the oldest terminal records
    /// beyond the cap. Active records, and records whose damage a stop could
    /// still undo, are never evicted.
    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<Vec<AttackId>, RepositoryError>;
}
