// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::attack::{AttackId, AttackKind, AttackRecord, DomainError};
use crate::domain::repository::{AttackRepository, RepositoryError, RetentionPolicy};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-local attack store. Records live until evicted by retention.
#[derive(Clone, Default)]
pub struct InMemoryAttackRepository {
    records: Arc<RwLock<HashMap<AttackId, AttackRecord>>>,
}

impl InMemoryAttackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AttackRepository for InMemoryAttackRepository {
    fn insert(&self, record: AttackRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(RepositoryError::AlreadyExists(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: AttackId) -> Result<Option<AttackRecord>, RepositoryError> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn update(
        &self,
        id: AttackId,
        change: &mut dyn FnMut(&mut AttackRecord) -> Result<(), DomainError>,
    ) -> Result<AttackRecord, RepositoryError> {
        let mut records = self.records.write();
        let stored = records.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        let mut next = stored.clone();
        change(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    fn list(&self, kind: Option<AttackKind>) -> Result<Vec<AttackRecord>, RepositoryError> {
        let records = self.records.read();
        let mut matching: Vec<AttackRecord> = records
            .values()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    fn evict(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<Vec<AttackId>, RepositoryError> {
        let mut records = self.records.write();
        let cutoff = now - policy.ttl;

        let mut evicted: Vec<AttackId> = records
            .values()
            .filter(|r| r.is_evictable())
            .filter(|r| r.finished_at().unwrap_or(r.created_at) < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &evicted {
            records.remove(id);
        }

        if records.len() > policy.max_records {
            let mut terminal: Vec<(DateTime<Utc>, AttackId)> = records
                .values()
                .filter(|r| r.is_evictable())
                .map(|r| (r.created_at, r.id))
                .collect();
            terminal.sort();
            let excess = records.len() - policy.max_records;
            for (_, id) in terminal.into_iter().take(excess) {
                records.remove(&id);
                evicted.push(id);
            }
        }

        Ok(evicted)
    }
}
