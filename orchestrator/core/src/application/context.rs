// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Context
//!
//! Everything a runner needs for one attack: its record writer, the external
//! collaborators, the engine configuration and the attack's stop signal.
//!
//! All record mutation goes through [`RecordWriter`], which publishes a
//! `StateChanged` event and updates the lifecycle metrics for every state
//! change, whichever path (runner, supervisor, stop handler) made it.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::domain::attack::{AttackId, AttackKind, AttackRecord, AttackState, DomainError};
use crate::domain::config::EngineConfig;
use crate::domain::database::{DatabaseError, DatabaseProvider};
use crate::domain::events::AttackEvent;
use crate::domain::progress::KindProgress;
use crate::domain::repository::{AttackRepository, RepositoryError};
use crate::domain::runtime::{ContainerRuntime, RuntimeError};
use crate::domain::target::{TargetClient, TargetError};
use crate::domain::verification::{Verification, VerificationPhase};
use crate::infrastructure::env_file::{EnvFileError, EnvFileStore};
use crate::infrastructure::event_bus::EventBus;

/// Why a runner or a rollback stopped short.
#[derive(Debug, Error)]
pub enum AttackError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{0}")]
    Execution(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("attack cancelled")]
    Cancelled,

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error(transparent)]
    Record(#[from] RepositoryError),
}

impl From<RuntimeError> for AttackError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Timeout(_) => AttackError::Timeout(e.to_string()),
            other => AttackError::Execution(other.to_string()),
        }
    }
}

impl From<TargetError> for AttackError {
    fn from(e: TargetError) -> Self {
        match e {
            TargetError::Timeout { .. } => AttackError::Timeout(e.to_string()),
            other => AttackError::Execution(other.to_string()),
        }
    }
}

impl From<DatabaseError> for AttackError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Timeout(_) => AttackError::Timeout(e.to_string()),
            other => AttackError::Execution(other.to_string()),
        }
    }
}

impl From<EnvFileError> for AttackError {
    fn from(e: EnvFileError) -> Self {
        AttackError::Execution(e.to_string())
    }
}

impl From<DomainError> for AttackError {
    fn from(e: DomainError) -> Self {
        AttackError::Record(RepositoryError::Domain(e))
    }
}

/// External systems the runners act on.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub target: Arc<dyn TargetClient>,
    pub databases: Arc<dyn DatabaseProvider>,
    pub env_files: EnvFileStore,
}

/// Serialized write access to attack records.
#[derive(Clone)]
pub struct RecordWriter {
    repository: Arc<dyn AttackRepository>,
    events: EventBus,
}

impl RecordWriter {
    pub fn new(repository: Arc<dyn AttackRepository>, events: EventBus) -> Self {
        Self { repository, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn repository(&self) -> &Arc<dyn AttackRepository> {
        &self.repository
    }

    pub fn get(&self, id: AttackId) -> Result<AttackRecord, RepositoryError> {
        self.repository.get(id)?.ok_or(RepositoryError::NotFound(id))
    }

    pub fn update<F>(&self, id: AttackId, mut change: F) -> Result<AttackRecord, RepositoryError>
    where
        F: FnMut(&mut AttackRecord) -> Result<(), DomainError>,
    {
        self.repository.update(id, &mut change)
    }

    pub fn update_progress<P, F>(&self, id: AttackId, mut change: F) -> Result<AttackRecord, RepositoryError>
    where
        P: KindProgress,
        F: FnMut(&mut P),
    {
        self.update(id, |record| {
            change(record.progress.payload_mut::<P>()?);
            Ok(())
        })
    }

    /// Apply a state-changing closure; `Ok(None)` from the closure means it
    /// chose to leave the record as it was.
    fn change_state<F>(&self, id: AttackId, mut change: F) -> Result<AttackRecord, RepositoryError>
    where
        F: FnMut(&mut AttackRecord) -> Result<Option<AttackState>, DomainError>,
    {
        let mut from = None;
        let record = self.update(id, |record| {
            from = change(record)?;
            Ok(())
        })?;
        if let Some(from) = from {
            self.state_changed(&record, from);
        }
        Ok(record)
    }

    pub fn transition(&self, id: AttackId, to: AttackState) -> Result<AttackRecord, RepositoryError> {
        self.change_state(id, |record| record.transition(to).map(Some))
    }

    /// Transition and edit the record in the same atomic update.
    pub fn transition_with<F>(&self, id: AttackId, to: AttackState, mut edit: F) -> Result<AttackRecord, RepositoryError>
    where
        F: FnMut(&mut AttackRecord) -> Result<(), DomainError>,
    {
        self.change_state(id, |record| {
            let from = record.transition(to)?;
            edit(record)?;
            Ok(Some(from))
        })
    }

    /// Transition only while the attack is still active; a record some other
    /// path already settled is left alone.
    pub fn settle(&self, id: AttackId, to: AttackState) -> Result<AttackRecord, RepositoryError> {
        self.change_state(id, |record| {
            if !record.state().is_active() {
                return Ok(None);
            }
            record.transition(to).map(Some)
        })
    }

    /// Mark the attack `failed` unless another path already settled it.
    pub fn settle_failed(&self, id: AttackId, message: &str) -> Result<AttackRecord, RepositoryError> {
        self.change_state(id, |record| {
            if !record.state().is_active() {
                return Ok(None);
            }
            record.fail(message).map(Some)
        })
    }

    pub fn begin_rollback(&self, id: AttackId) -> Result<AttackRecord, RepositoryError> {
        self.change_state(id, |record| record.begin_rollback().map(Some))
    }

    pub fn fail_rollback(&self, id: AttackId, message: &str) -> Result<AttackRecord, RepositoryError> {
        self.change_state(id, |record| record.fail_rollback(message).map(Some))
    }

    pub fn record_verification(&self, id: AttackId, verification: Verification) -> Result<AttackRecord, RepositoryError> {
        let record = self.update(id, |record| {
            match verification.phase {
                VerificationPhase::Attack => record.verification = Some(verification.clone()),
                VerificationPhase::Recovery => record.recovery_verification = Some(verification.clone()),
            }
            Ok(())
        })?;
        info!(
            attack_id = %id,
            phase = ?verification.phase,
            verified = verification.verified,
            "Verification recorded"
        );
        self.events.publish(AttackEvent::VerificationRecorded {
            attack_id: id,
            kind: record.kind,
            phase: verification.phase,
            verified: verification.verified,
            recorded_at: verification.checked_at,
        });
        Ok(record)
    }

    fn state_changed(&self, record: &AttackRecord, from: AttackState) {
        let to = record.state();
        info!(attack_id = %record.id, kind = %record.kind, from = %from, to = %to, "Attack state changed");

        if from.is_active() && to.is_terminal() {
            metrics::counter!(
                "aegis_chaos_attacks_finished_total",
                "kind" => record.kind.as_str(),
                "state" => to.as_str()
            )
            .increment(1);
            metrics::gauge!("aegis_chaos_active_attacks").decrement(1.0);
        } else if from.is_terminal() && to.is_active() {
            metrics::gauge!("aegis_chaos_active_attacks").increment(1.0);
        }

        self.events.publish(AttackEvent::StateChanged {
            attack_id: record.id,
            kind: record.kind,
            from,
            to,
            changed_at: Utc::now(),
        });
    }
}

/// Per-attack handle passed to a runner.
pub struct RunContext {
    pub id: AttackId,
    pub kind: AttackKind,
    pub records: RecordWriter,
    pub collaborators: Collaborators,
    pub config: Arc<EngineConfig>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RunContext {
    pub fn new(
        id: AttackId,
        kind: AttackKind,
        records: RecordWriter,
        collaborators: Collaborators,
        config: Arc<EngineConfig>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            id,
            kind,
            records,
            collaborators,
            config,
            cancel,
            tracker,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn transition(&self, to: AttackState) -> Result<(), AttackError> {
        self.records.transition(self.id, to)?;
        Ok(())
    }

    pub fn progress<P: KindProgress>(&self, change: impl FnMut(&mut P)) -> Result<(), AttackError> {
        self.records.update_progress::<P, _>(self.id, change)?;
        Ok(())
    }

    pub fn verify(&self, verification: Verification) -> Result<(), AttackError> {
        self.records.record_verification(self.id, verification)?;
        Ok(())
    }

    /// Sleep unless the attack is stopped first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AttackError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AttackError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run a mutation of the target to completion even if the attack is
    /// cancelled while it is in flight. A stop waits for these before it
    /// starts rolling back.
    pub async fn shielded<T, F>(&self, work: F) -> Result<T, AttackError>
    where
        F: Future<Output = Result<T, AttackError>> + Send + 'static,
        T: Send + 'static,
    {
        match self.tracker.spawn(work).await {
            Ok(result) => result,
            Err(e) => Err(AttackError::Execution(format!("critical section did not finish: {}", e))),
        }
    }
}
