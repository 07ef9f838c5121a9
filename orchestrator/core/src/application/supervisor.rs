// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Supervisor
//!
//! Owns the task of every running attack. Each attack gets a
//! `CancellationToken` (the stop signal) and a `TaskTracker` holding the
//! supervising task, the runner task and any shielded critical sections.
//!
//! The supervisor is the only place a runner's result is turned into a
//! terminal state: normal returns, errors, cancellation and panics all end in
//! a settled record.
//!
//! ## Settling
//! | Runner result | Record |
//! |---------------|--------|
//! | `Finished(state)` | `state` |
//! | `RollbackAfter(d)` | stays `running`; automatic rollback after `d` |
//! | `Err(Cancelled)` | `cancelled` |
//! | `Err(_)` or panic | `failed` with sanitized message |

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, info_span, warn, Instrument};

use crate::application::context::{AttackError, Collaborators, RecordWriter, RunContext};
use crate::application::rollback::{RollbackController, RollbackTrigger};
use crate::application::runners::{runner_for, AttackRunner, RunOutcome};
use crate::domain::attack::{AttackId, AttackRecord, AttackState, Placement};
use crate::domain::config::EngineConfig;
use crate::domain::parameters::AttackParameters;

/// Control handle of one launched attack.
#[derive(Clone)]
pub struct AttackHandle {
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
    pub placement: Placement,
}

impl AttackHandle {
    /// Signal stop and wait up to `grace` for every task of the attack,
    /// shielded sections included. Returns `false` on timeout.
    pub async fn stop(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

pub struct AttackSupervisor {
    records: RecordWriter,
    collaborators: Collaborators,
    config: Arc<EngineConfig>,
    rollback: Arc<RollbackController>,
    handles: Mutex<HashMap<AttackId, AttackHandle>>,
}

impl AttackSupervisor {
    pub fn new(
        records: RecordWriter,
        collaborators: Collaborators,
        config: Arc<EngineConfig>,
        rollback: Arc<RollbackController>,
    ) -> Self {
        Self {
            records,
            collaborators,
            config,
            rollback,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule the runner for a freshly inserted `starting` record.
    pub fn launch(self: &Arc<Self>, record: &AttackRecord) -> AttackHandle {
        let runner = runner_for(record.kind);
        let handle = AttackHandle {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            placement: runner.placement(),
        };
        self.handles.lock().insert(record.id, handle.clone());

        let span = info_span!("attack", attack_id = %record.id, kind = %record.kind);
        let this = Arc::clone(self);
        let (id, params, task_handle) = (record.id, record.parameters.clone(), handle.clone());
        handle
            .tracker
            .spawn(async move { this.supervise(id, runner, params, task_handle).await }.instrument(span));
        handle
    }

    pub fn handle(&self, id: AttackId) -> Option<AttackHandle> {
        self.handles.lock().get(&id).cloned()
    }

    pub fn forget(&self, id: AttackId) {
        self.handles.lock().remove(&id);
    }

    async fn supervise(
        self: Arc<Self>,
        id: AttackId,
        runner: Arc<dyn AttackRunner>,
        params: AttackParameters,
        handle: AttackHandle,
    ) {
        let ctx = RunContext::new(
            id,
            runner.kind(),
            self.records.clone(),
            self.collaborators.clone(),
            self.config.clone(),
            handle.cancel.clone(),
            handle.tracker.clone(),
        );
        let task = handle
            .tracker
            .spawn(async move { runner.run(ctx, params).await }.in_current_span());

        let result = match handle.placement {
            Placement::Cooperative => {
                let abort = task.abort_handle();
                tokio::select! {
                    biased;
                    _ = handle.cancel.cancelled() => {
                        abort.abort();
                        Err(AttackError::Cancelled)
                    }
                    joined = task => Self::joined(joined),
                }
            }
            // The holder thread watches the token itself and always reports back.
            Placement::DedicatedThread => Self::joined(task.await),
        };

        let settled = match result {
            Ok(RunOutcome::Finished(state)) => self.records.settle(id, state).map(|_| ()),
            Ok(RunOutcome::RollbackAfter(delay)) => {
                self.scheduled_rollback(id, delay, &handle.cancel).await;
                Ok(())
            }
            Err(AttackError::Cancelled) => {
                info!("Attack cancelled");
                self.records.settle(id, AttackState::Cancelled).map(|_| ())
            }
            Err(e) => {
                warn!(error = %e, "Attack failed");
                self.records.settle_failed(id, &e.to_string()).map(|_| ())
            }
        };
        if let Err(e) = settled {
            error!(error = %e, "Failed to settle attack record");
        }
    }

    fn joined(joined: Result<Result<RunOutcome, AttackError>, JoinError>) -> Result<RunOutcome, AttackError> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(AttackError::Execution(format!(
                "runner panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(_) => Err(AttackError::Cancelled),
        }
    }

    async fn scheduled_rollback(&self, id: AttackId, delay: Duration, cancel: &CancellationToken) {
        info!(delay_secs = delay.as_secs(), "Automatic rollback scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        // A stop holding the lock cancels first; let it have the record.
        let guard = tokio::select! {
            _ = cancel.cancelled() => return,
            guard = self.rollback.lock(id) => guard,
        };
        match self.rollback.rollback(id, RollbackTrigger::Automatic, &guard).await {
            Ok(record) => info!(state = %record.state(), "Automatic rollback finished"),
            Err(e) => error!(error = %e, "Automatic rollback could not run"),
        }
    }

    /// Stop every attack and wait for their tasks. Damage is not rolled back.
    pub async fn shutdown(&self) {
        let handles: Vec<(AttackId, AttackHandle)> =
            self.handles.lock().iter().map(|(id, h)| (*id, h.clone())).collect();
        let grace = self.config.timings.cancel_grace().max(self.config.lock_holder.stop_grace());
        for (id, handle) in handles {
            if handle.tracker.is_empty() {
                continue;
            }
            if !handle.stop(grace).await {
                warn!(attack_id = %id, "Attack tasks still running at shutdown");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
