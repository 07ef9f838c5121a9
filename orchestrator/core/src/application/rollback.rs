// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rollback Controller
//!
//! Undoes the damage of one attack from the data saved in its record. The
//! same controller serves the automatic rollback at the end of a time-boxed
//! attack and the rollback of an explicit stop; the per-attack mutex makes
//! the two mutually exclusive, so a record is rolled back at most once.
//!
//! A rollback that cannot complete leaves the record in `rollback_failed`
//! with the reason in `rollback_error`; it never panics the caller and never
//! reports the error as a rollback that happened.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::application::context::{AttackError, Collaborators, RecordWriter};
use crate::application::runners::rate_limit_flood::send_burst;
use crate::application::verification::await_liveness;
use crate::domain::attack::{AttackId, AttackRecord, AttackState};
use crate::domain::config::EngineConfig;
use crate::domain::parameters::{
    AttackParameters, EnvCorruptParams, MigrationCorruptParams, ProcessCrashParams, RateLimitFloodParams,
};
use crate::domain::progress::{
    EnvCorruptProgress, LongTransactionProgress, MigrationCorruptProgress, ProcessCrashProgress,
    RateLimitFloodProgress,
};
use crate::domain::runtime::ServiceRef;
use crate::domain::target::RateLimitConfigUpdate;
use crate::domain::verification::{Verification, VerificationPhase};
use crate::infrastructure::env_file::EnvSnapshot;

/// Who asked for the rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTrigger {
    /// End of a time-boxed attack.
    Automatic,
    /// An explicit stop request.
    Manual,
}

impl RollbackTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            RollbackTrigger::Automatic => "automatic",
            RollbackTrigger::Manual => "manual",
        }
    }
}

/// Proof that the caller holds the attack's rollback lock.
pub struct RollbackGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct RollbackController {
    records: RecordWriter,
    collaborators: Collaborators,
    config: Arc<EngineConfig>,
    locks: Mutex<HashMap<AttackId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RollbackController {
    pub fn new(records: RecordWriter, collaborators: Collaborators, config: Arc<EngineConfig>) -> Self {
        Self {
            records,
            collaborators,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take the per-attack lock that serializes stop handling and rollback.
    pub async fn lock(&self, id: AttackId) -> RollbackGuard {
        let mutex = self.locks.lock().entry(id).or_default().clone();
        RollbackGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Drop the lock entry of an evicted record.
    pub fn forget(&self, id: AttackId) {
        self.locks.lock().remove(&id);
    }

    /// The attack left damage behind that has not been undone yet, and its
    /// state still allows a rollback to begin.
    pub fn is_applicable(record: &AttackRecord) -> bool {
        record.parameters.has_rollback()
            && record.progress.needs_rollback()
            && record.state().can_begin_rollback()
    }

    /// Roll the attack back. A record that is already rolled back, or has
    /// nothing to undo, is returned as is.
    ///
    /// Returns the record after the rollback settled; a failed undo is a
    /// `rollback_failed` record, not an `Err`. `Err` is reserved for record
    /// store failures.
    pub async fn rollback(
        &self,
        id: AttackId,
        trigger: RollbackTrigger,
        _guard: &RollbackGuard,
    ) -> Result<AttackRecord, AttackError> {
        let record = self.records.get(id)?;
        if record.state() == AttackState::RolledBack || !Self::is_applicable(&record) {
            return Ok(record);
        }

        self.records.begin_rollback(id)?;
        info!(attack_id = %id, kind = %record.kind, trigger = trigger.as_str(), "Rolling back attack");

        let result = match &record.parameters {
            AttackParameters::ProcessCrash(params) => self.restart_container(id, params, trigger).await,
            AttackParameters::EnvCorrupt(params) => self.restore_env_file(id, params).await,
            AttackParameters::MigrationCorrupt(params) => self.restore_schema_version(id, params).await,
            AttackParameters::RateLimitFlood(params) => self.restore_rate_limit(id, params, trigger).await,
            AttackParameters::PoolFlood(_) | AttackParameters::LongTransaction(_) => Ok(AttackState::RolledBack),
        };

        let (record, outcome) = match result {
            Ok(settled) => (self.records.transition(id, settled)?, settled.as_str()),
            Err(e) => {
                warn!(attack_id = %id, error = %e, "Rollback failed");
                (self.records.fail_rollback(id, &e.to_string())?, AttackState::RollbackFailed.as_str())
            }
        };
        metrics::counter!(
            "aegis_chaos_rollbacks_total",
            "kind" => record.kind.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        Ok(record)
    }

    fn settled(trigger: RollbackTrigger, verified: bool) -> AttackState {
        match (verified, trigger) {
            (false, _) => AttackState::PartiallyRecovered,
            (true, RollbackTrigger::Automatic) => AttackState::Completed,
            (true, RollbackTrigger::Manual) => AttackState::RolledBack,
        }
    }

    async fn restart_container(
        &self,
        id: AttackId,
        params: &ProcessCrashParams,
        trigger: RollbackTrigger,
    ) -> Result<AttackState, AttackError> {
        let record = self.records.get(id)?;
        let stopped = record.progress.payload::<ProcessCrashProgress>()?.container_stopped;
        if !stopped {
            self.records
                .update_progress::<ProcessCrashProgress, _>(id, |p| p.restored = true)?;
            return Ok(AttackState::RolledBack);
        }

        let runtime = &self.collaborators.runtime;
        if !runtime.is_running(&params.container_name).await? {
            info!(container = %params.container_name, "Starting container");
            runtime.start(&params.container_name).await?;
        }
        tokio::time::sleep(self.config.timings.post_start_settle()).await;

        let (observed_up, attempts) = await_liveness(
            self.collaborators.target.as_ref(),
            &params.target_base_url,
            true,
            &self.config.liveness,
        )
        .await;
        self.records.record_verification(
            id,
            Verification::liveness(VerificationPhase::Recovery, true, observed_up, attempts),
        )?;
        self.records.update_progress::<ProcessCrashProgress, _>(id, |p| {
            p.api_verified_up = Some(observed_up);
            p.restored = observed_up;
        })?;
        Ok(Self::settled(trigger, observed_up))
    }

    async fn restore_env_file(&self, id: AttackId, params: &EnvCorruptParams) -> Result<AttackState, AttackError> {
        let record = self.records.get(id)?;
        let progress = record.progress.payload::<EnvCorruptProgress>()?;

        if progress.snapshot_taken && !progress.file_restored {
            let snapshot = EnvSnapshot {
                attack_id: id,
                backup_path: progress.backup_path.clone(),
            };
            self.collaborators
                .env_files
                .restore(&params.env_file, &snapshot)
                .await?;
            self.records
                .update_progress::<EnvCorruptProgress, _>(id, |p| p.file_restored = true)?;
            info!(env_file = %params.env_file.display(), "Env file restored");
        }
        if progress.file_mutated {
            let service = ServiceRef::from_compose_file(params.compose_file.as_deref(), params.compose_service.clone());
            let restarted = self.collaborators.runtime.restart_service(&service).await?;
            info!(containers = ?restarted, "Restarted service with restored env");
            tokio::time::sleep(self.config.timings.post_restart_settle()).await;
        }
        self.records
            .update_progress::<EnvCorruptProgress, _>(id, |p| p.restored = true)?;
        Ok(AttackState::RolledBack)
    }

    async fn restore_schema_version(
        &self,
        id: AttackId,
        params: &MigrationCorruptParams,
    ) -> Result<AttackState, AttackError> {
        let record = self.records.get(id)?;
        let progress = record.progress.payload::<MigrationCorruptProgress>()?;
        if !progress.snapshot_taken {
            self.records
                .update_progress::<MigrationCorruptProgress, _>(id, |p| p.restored = true)?;
            return Ok(AttackState::RolledBack);
        }

        let original = progress.original_version.clone();
        let database = self.collaborators.databases.connect(&params.database_url);
        database.write_schema_version(original.as_deref()).await?;
        let observed = database.read_schema_version().await?;
        let verification = Verification::read_back(VerificationPhase::Recovery, original, observed.clone());
        let verified = verification.verified;
        self.records.record_verification(id, verification)?;
        self.records.update_progress::<MigrationCorruptProgress, _>(id, |p| {
            p.restored_version = observed.clone();
            p.restored = verified;
        })?;
        info!(restored = ?observed, verified, "Schema version restored");

        Ok(if verified {
            AttackState::RolledBack
        } else {
            AttackState::PartiallyRecovered
        })
    }

    async fn restore_rate_limit(
        &self,
        id: AttackId,
        params: &RateLimitFloodParams,
        trigger: RollbackTrigger,
    ) -> Result<AttackState, AttackError> {
        let record = self.records.get(id)?;
        let progress = record.progress.payload::<RateLimitFloodProgress>()?;
        if !progress.config_pushed {
            self.records
                .update_progress::<RateLimitFloodProgress, _>(id, |p| p.restored = true)?;
            return Ok(AttackState::RolledBack);
        }
        let original = progress.original_config.clone().unwrap_or_default();

        let target = self.collaborators.target.as_ref();
        let restored = target
            .update_rate_limit_config(&params.target_base_url, &RateLimitConfigUpdate::from(&original))
            .await?;
        self.records
            .update_progress::<RateLimitFloodProgress, _>(id, |p| p.restored_config = Some(restored.clone()))?;
        tokio::time::sleep(self.config.timings.post_config_settle()).await;

        let burst = params.max_requests + self.config.verification.recovery_burst_margin;
        let tally = send_burst(
            target,
            &params.target_base_url,
            &params.target_endpoint,
            burst,
            params.flood_rate,
            |_| {},
        )
        .await;
        let verification = Verification::rate_limit_lifted(
            u64::from(burst),
            u64::from(params.max_requests),
            u64::from(tally.rate_limited),
        );
        let verified = verification.verified;
        self.records.record_verification(id, verification)?;
        self.records.update_progress::<RateLimitFloodProgress, _>(id, |p| {
            p.recovery_test = Some(tally.clone());
            p.restored = verified;
        })?;
        info!(burst, rate_limited = tally.rate_limited, verified, "Rate limit restored");
        Ok(Self::settled(trigger, verified))
    }

    /// Terminate the lock holder's backend from an independent session.
    pub async fn force_kill(&self, id: AttackId) -> Result<AttackRecord, AttackError> {
        let record = self.records.get(id)?;
        let params = match &record.parameters {
            AttackParameters::LongTransaction(params) => params,
            other => {
                return Err(AttackError::Precondition(format!(
                    "{} attacks cannot be force-killed",
                    other.kind()
                )))
            }
        };
        let pid = record
            .progress
            .payload::<LongTransactionProgress>()?
            .backend_pid
            .ok_or_else(|| AttackError::Precondition("lock holder has no backend session yet".to_string()))?;

        let database = self.collaborators.databases.connect(&params.database_url);
        let terminated = database.terminate_backend(pid).await?;
        warn!(attack_id = %id, pid, terminated, "Force-killed lock holder backend");

        let record = self.records.transition_with(id, AttackState::ForceKilled, |record| {
            record.progress.payload_mut::<LongTransactionProgress>()?.force_killed = true;
            Ok(())
        })?;
        Ok(record)
    }
}
