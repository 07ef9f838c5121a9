// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Service
//!
//! Application entry point used by the HTTP surface and the CLI server:
//! start, status, list, stop, advisory-lock probe and record retention.
//!
//! ## Stop
//!
//! Stop requests for one attack are serialized with each other and with the
//! automatic rollback through the rollback controller's per-attack lock.
//!
//! | Record | Stop |
//! |--------|------|
//! | active, cooperative | cancel, wait for shielded sections, roll back if damage was applied |
//! | active, lock holder | signal, wait the grace period; force-kill on opt-in, else `stopping` |
//! | `failed` / `rollback_failed` | surface the stored error; `retry` re-attempts the rollback |
//! | other terminal, damage left | roll back |
//! | other terminal | `already_<state>` |

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::context::{AttackError, Collaborators, RecordWriter};
use crate::application::rollback::{RollbackController, RollbackGuard, RollbackTrigger};
use crate::application::supervisor::AttackSupervisor;
use crate::domain::attack::{AttackId, AttackKind, AttackRecord, AttackState, AttackSummary, DomainError, Placement};
use crate::domain::config::EngineConfig;
use crate::domain::database::{LockProbe, LockTarget};
use crate::domain::events::AttackEvent;
use crate::domain::parameters::AttackParameters;
use crate::domain::progress::LongTransactionProgress;
use crate::domain::repository::{AttackRepository, RepositoryError};
use crate::domain::sanitize::sanitize_message;
use crate::infrastructure::event_bus::{EventBus, EventBusError};

#[derive(Debug, Error)]
pub enum AttackServiceError {
    #[error("attack not found: {0}")]
    NotFound(AttackId),

    #[error(transparent)]
    InvalidParameters(DomainError),

    /// Stop on an error state without a retryable rollback.
    #[error("attack is {state}: {message}")]
    Unrecoverable {
        id: AttackId,
        state: AttackState,
        message: String,
    },

    #[error("rollback failed: {message}")]
    RollbackFailed { id: AttackId, message: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AttackServiceError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => AttackServiceError::NotFound(id),
            other => AttackServiceError::Internal(sanitize_message(&other.to_string())),
        }
    }
}

impl From<AttackError> for AttackServiceError {
    fn from(e: AttackError) -> Self {
        match e {
            AttackError::Record(e) => e.into(),
            AttackError::Precondition(message) => AttackServiceError::Unsupported(sanitize_message(&message)),
            other => AttackServiceError::Internal(sanitize_message(&other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Terminate the lock holder's backend if it ignores the stop signal.
    pub force_kill: bool,
    /// Re-attempt the rollback of a `failed` or `rollback_failed` attack.
    pub retry: bool,
}

/// Result of a stop request, carrying the record as it stands afterwards.
#[derive(Debug, Clone)]
pub enum StopOutcome {
    /// The stop changed the record.
    Stopped(AttackRecord),
    /// The record was already terminal with nothing to undo.
    Already(AttackRecord),
    /// The lock holder has not released yet.
    Stopping(AttackRecord),
}

impl StopOutcome {
    pub fn record(&self) -> &AttackRecord {
        match self {
            StopOutcome::Stopped(record) | StopOutcome::Already(record) | StopOutcome::Stopping(record) => record,
        }
    }

    pub fn status(&self) -> String {
        match self {
            StopOutcome::Stopped(record) => record.state().as_str().to_string(),
            StopOutcome::Already(record) => format!("already_{}", record.state()),
            StopOutcome::Stopping(_) => "stopping".to_string(),
        }
    }
}

pub type AttackEventStream = Pin<Box<dyn Stream<Item = AttackEvent> + Send>>;

#[async_trait]
pub trait AttackService: Send + Sync {
    async fn start(&self, parameters: AttackParameters) -> Result<AttackId, AttackServiceError>;
    async fn status(&self, id: AttackId) -> Result<AttackRecord, AttackServiceError>;
    async fn list(&self, kind: Option<AttackKind>) -> Result<Vec<AttackSummary>, AttackServiceError>;
    async fn stop(&self, id: AttackId, options: StopOptions) -> Result<StopOutcome, AttackServiceError>;
    /// Try the attack's advisory lock from an independent session.
    async fn probe_lock(&self, id: AttackId) -> Result<LockProbe, AttackServiceError>;
    fn subscribe(&self) -> AttackEventStream;
    /// Events of one attack only.
    fn subscribe_attack(&self, id: AttackId) -> AttackEventStream;
    async fn evict_expired(&self) -> Result<Vec<AttackId>, AttackServiceError>;
}

pub struct StandardAttackService {
    config: Arc<EngineConfig>,
    records: RecordWriter,
    collaborators: Collaborators,
    rollback: Arc<RollbackController>,
    supervisor: Arc<AttackSupervisor>,
}

impl StandardAttackService {
    pub fn new(
        config: Arc<EngineConfig>,
        repository: Arc<dyn AttackRepository>,
        collaborators: Collaborators,
        events: EventBus,
    ) -> Self {
        let records = RecordWriter::new(repository, events);
        let rollback = Arc::new(RollbackController::new(
            records.clone(),
            collaborators.clone(),
            config.clone(),
        ));
        let supervisor = Arc::new(AttackSupervisor::new(
            records.clone(),
            collaborators.clone(),
            config.clone(),
            rollback.clone(),
        ));
        Self {
            config,
            records,
            collaborators,
            rollback,
            supervisor,
        }
    }

    /// Periodically evict expired records until `cancel` fires.
    pub fn spawn_retention_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.config.retention.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match service.evict_expired().await {
                    Ok(evicted) if !evicted.is_empty() => info!(count = evicted.len(), "Evicted expired attack records"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Retention sweep failed"),
                }
            }
            debug!("Retention sweeper stopped");
        })
    }

    /// Stop every running attack.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    async fn stop_active(
        &self,
        id: AttackId,
        options: StopOptions,
        guard: &RollbackGuard,
    ) -> Result<StopOutcome, AttackServiceError> {
        if let Some(handle) = self.supervisor.handle(id) {
            let grace = match handle.placement {
                Placement::Cooperative => self.config.timings.cancel_grace(),
                Placement::DedicatedThread => self.config.lock_holder.stop_grace(),
            };
            if !handle.stop(grace).await {
                if handle.placement == Placement::DedicatedThread && options.force_kill {
                    let record = self.rollback.force_kill(id).await?;
                    return Ok(StopOutcome::Stopped(record));
                }
                info!(attack_id = %id, grace_ms = grace.as_millis() as u64, "Attack has not stopped yet");
                return Ok(StopOutcome::Stopping(self.records.get(id)?));
            }
        }

        let record = self.records.get(id)?;
        if settled_before_stop(record.state()) {
            debug!(attack_id = %id, state = %record.state(), "Attack settled before the stop landed");
            return self.stop_settled(record, options, guard).await;
        }
        if RollbackController::is_applicable(&record) {
            return self.roll_back(id, guard).await;
        }
        Ok(StopOutcome::Stopped(self.records.settle(id, AttackState::Cancelled)?))
    }

    async fn stop_settled(
        &self,
        record: AttackRecord,
        options: StopOptions,
        guard: &RollbackGuard,
    ) -> Result<StopOutcome, AttackServiceError> {
        let (id, state) = (record.id, record.state());
        if state.is_error() {
            if options.retry && RollbackController::is_applicable(&record) {
                return self.roll_back(id, guard).await;
            }
            return Err(AttackServiceError::Unrecoverable {
                id,
                state,
                message: record.failure_message(),
            });
        }
        if RollbackController::is_applicable(&record) {
            return self.roll_back(id, guard).await;
        }
        Ok(StopOutcome::Already(record))
    }

    async fn roll_back(&self, id: AttackId, guard: &RollbackGuard) -> Result<StopOutcome, AttackServiceError> {
        let record = self.rollback.rollback(id, RollbackTrigger::Manual, guard).await?;
        if record.state() == AttackState::RollbackFailed {
            return Err(AttackServiceError::RollbackFailed {
                id,
                message: record.failure_message(),
            });
        }
        Ok(StopOutcome::Stopped(record))
    }
}

/// A stop ends a cooperative attack `cancelled` and a lock holder
/// `rolled_back`; any other terminal state after the stop signal was reached
/// by the runner on its own.
fn settled_before_stop(state: AttackState) -> bool {
    state.is_terminal() && !matches!(state, AttackState::Cancelled | AttackState::RolledBack)
}

#[async_trait]
impl AttackService for StandardAttackService {
    async fn start(&self, parameters: AttackParameters) -> Result<AttackId, AttackServiceError> {
        parameters.validate().map_err(AttackServiceError::InvalidParameters)?;

        let record = AttackRecord::new(AttackId::new(), parameters);
        let (id, kind) = (record.id, record.kind);
        self.records.repository().insert(record.clone())?;
        info!(attack_id = %id, kind = %kind, "Attack started");

        metrics::counter!("aegis_chaos_attacks_started_total", "kind" => kind.as_str()).increment(1);
        metrics::gauge!("aegis_chaos_active_attacks").increment(1.0);
        self.records.events().publish(AttackEvent::AttackStarted {
            attack_id: id,
            kind,
            started_at: record.created_at,
        });

        self.supervisor.launch(&record);
        Ok(id)
    }

    async fn status(&self, id: AttackId) -> Result<AttackRecord, AttackServiceError> {
        Ok(self.records.get(id)?)
    }

    async fn list(&self, kind: Option<AttackKind>) -> Result<Vec<AttackSummary>, AttackServiceError> {
        let records = self.records.repository().list(kind)?;
        Ok(records.iter().map(AttackRecord::summary).collect())
    }

    async fn stop(&self, id: AttackId, options: StopOptions) -> Result<StopOutcome, AttackServiceError> {
        // Unknown ids must not leave a lock entry behind.
        self.records.get(id)?;
        let guard = self.rollback.lock(id).await;
        let record = self.records.get(id)?;
        let state = record.state();
        info!(attack_id = %id, state = %state, force_kill = options.force_kill, retry = options.retry, "Stop requested");

        if state.is_active() {
            return self.stop_active(id, options, &guard).await;
        }
        self.stop_settled(record, options, &guard).await
    }

    async fn probe_lock(&self, id: AttackId) -> Result<LockProbe, AttackServiceError> {
        let record = self.records.get(id)?;
        let lock_id = match &record.parameters {
            AttackParameters::LongTransaction(params) => LockTarget::from_params(params, id).advisory_id(),
            _ => None,
        };
        let (lock_id, database_url) = match (lock_id, &record.parameters) {
            (Some(lock_id), AttackParameters::LongTransaction(params)) => (lock_id, &params.database_url),
            _ => {
                return Err(AttackServiceError::Unsupported(
                    "only advisory lock attacks can be probed".to_string(),
                ))
            }
        };

        let database = self.collaborators.databases.connect(database_url);
        let lock_acquired = database.try_advisory_lock(lock_id).await.map_err(AttackError::from)?;
        let probe = LockProbe {
            lock_id,
            lock_acquired,
            attack_state: record.state(),
            probed_at: Utc::now(),
        };
        self.records
            .update_progress::<LongTransactionProgress, _>(id, |p| p.probes.push(probe.clone()))?;
        info!(attack_id = %id, lock_id, lock_acquired, "Advisory lock probed");
        self.records.events().publish(AttackEvent::LockProbed {
            attack_id: id,
            lock_id,
            lock_acquired,
            probed_at: probe.probed_at,
        });
        Ok(probe)
    }

    fn subscribe(&self) -> AttackEventStream {
        let receiver = self.records.events().subscribe();
        Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(EventBusError::Closed) => return None,
                }
            }
        }))
    }

    fn subscribe_attack(&self, id: AttackId) -> AttackEventStream {
        let receiver = self.records.events().subscribe_attack(id);
        Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(EventBusError::Closed) => return None,
                }
            }
        }))
    }

    async fn evict_expired(&self) -> Result<Vec<AttackId>, AttackServiceError> {
        let now = Utc::now();
        let evicted = self
            .records
            .repository()
            .evict(&self.config.retention.policy(), now)?;
        for id in &evicted {
            self.supervisor.forget(*id);
            self.rollback.forget(*id);
            self.records.events().publish(AttackEvent::RecordEvicted {
                attack_id: *id,
                evicted_at: now,
            });
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parameters::PoolFloodParams;

    fn record(parameters: AttackParameters) -> AttackRecord {
        AttackRecord::new(AttackId::new(), parameters)
    }

    #[test]
    fn test_stop_status_strings() {
        let mut rec = record(AttackParameters::PoolFlood(PoolFloodParams {
            target_base_url: "http://localhost:8000".to_string(),
            connections: 5,
            hold_seconds: 2,
        }));
        rec.transition(AttackState::Running).unwrap();
        rec.transition(AttackState::Completed).unwrap();
        assert_eq!(StopOutcome::Already(rec.clone()).status(), "already_completed");
        assert_eq!(StopOutcome::Stopped(rec.clone()).status(), "completed");
        assert_eq!(StopOutcome::Stopping(rec).status(), "stopping");
    }

    #[test]
    fn test_runner_outcomes_count_as_settled_before_stop() {
        assert!(settled_before_stop(AttackState::Completed));
        assert!(settled_before_stop(AttackState::Crashed));
        assert!(settled_before_stop(AttackState::Failed));
        assert!(settled_before_stop(AttackState::PartiallyRecovered));
        assert!(!settled_before_stop(AttackState::Cancelled));
        assert!(!settled_before_stop(AttackState::RolledBack));
        assert!(!settled_before_stop(AttackState::Running));
    }

    #[test]
    fn test_precondition_maps_to_unsupported() {
        let err: AttackServiceError = AttackError::Precondition("no backend session".into()).into();
        assert!(matches!(err, AttackServiceError::Unsupported(_)));

        let id = AttackId::new();
        let err: AttackServiceError = AttackError::Record(RepositoryError::NotFound(id)).into();
        assert!(matches!(err, AttackServiceError::NotFound(found) if found == id));
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err: AttackServiceError =
            AttackError::Execution("connect postgres://admin:hunter2@db/app failed".into()).into();
        assert!(!err.to_string().contains("hunter2"));
    }
}
