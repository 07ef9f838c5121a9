// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Long Transaction Lock Holder
//!
//! Holds a table, row or advisory lock inside one open transaction for the
//! whole attack. The session lives on a dedicated OS thread running its own
//! current-thread runtime, so a hold of any length never occupies a worker of
//! the shared scheduler.
//!
//! The thread talks back over channels only: [`HolderUpdate`]s stream over an
//! mpsc channel and are applied to the record by the runner on the shared
//! runtime; the final [`HolderEnd`] arrives over a oneshot. The stop signal is
//! the attack's `CancellationToken`, checked between polls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::{parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::database::{BlockedQuery, DatabaseError, LockAcquisition, LockSession, LockTarget, TargetDatabase};
use crate::domain::parameters::AttackParameters;
use crate::domain::progress::LongTransactionProgress;

#[derive(Debug)]
enum HolderUpdate {
    SessionOpened { pid: i32 },
    Acquired { acquisition: LockAcquisition, at: DateTime<Utc> },
    Blocked(Vec<BlockedQuery>),
    Released { by_stop: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HolderEnd {
    /// Stopped before the lock was taken.
    NotAcquired,
    /// Held for the full duration.
    Completed,
    /// Released early on stop.
    Stopped,
}

struct LockHold {
    database: Arc<dyn TargetDatabase>,
    target: LockTarget,
    duration: Option<Duration>,
    poll_interval: Duration,
    cancel: CancellationToken,
    updates: mpsc::UnboundedSender<HolderUpdate>,
}

impl LockHold {
    fn send(&self, update: HolderUpdate) {
        if self.updates.send(update).is_err() {
            debug!("Lock holder update dropped; runner is gone");
        }
    }

    async fn run(self) -> Result<HolderEnd, DatabaseError> {
        let mut session = self.database.open_lock_session().await?;
        let result = self.hold(session.as_mut()).await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "Error closing lock session");
        }
        result
    }

    async fn hold(&self, session: &mut dyn LockSession) -> Result<HolderEnd, DatabaseError> {
        let pid = session.backend_pid().await?;
        self.send(HolderUpdate::SessionOpened { pid });

        session.begin().await?;
        if self.cancel.is_cancelled() {
            session.release(&self.target, false).await?;
            return Ok(HolderEnd::NotAcquired);
        }

        let acquisition = session.acquire(&self.target).await?;
        info!(pid, lock_mode = self.target.lock_mode(), "Lock acquired");
        self.send(HolderUpdate::Acquired {
            acquisition,
            at: Utc::now(),
        });

        let deadline = self.duration.map(|d| Instant::now() + d);
        let stopped = loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break true,
                _ = tokio::time::sleep(wait) => {}
            }
            match self.database.blocked_queries(pid).await {
                Ok(blocked) => self.send(HolderUpdate::Blocked(blocked)),
                Err(e) => warn!(error = %e, "Failed to poll blocked queries"),
            }
        };

        let commit = self.target.commits_on_release() && !stopped;
        session.release(&self.target, commit).await?;
        info!(pid, commit, by_stop = stopped, "Lock released");
        self.send(HolderUpdate::Released { by_stop: stopped });

        Ok(if stopped { HolderEnd::Stopped } else { HolderEnd::Completed })
    }
}

pub struct LongTransactionRunner;

impl LongTransactionRunner {
    fn apply(ctx: &RunContext, update: HolderUpdate) -> Result<(), AttackError> {
        match update {
            HolderUpdate::SessionOpened { pid } => {
                ctx.progress::<LongTransactionProgress>(|p| p.backend_pid = Some(pid))?;
                ctx.transition(AttackState::Running)
            }
            HolderUpdate::Acquired { acquisition, at } => ctx.progress::<LongTransactionProgress>(|p| {
                p.rows_locked = acquisition.rows_locked;
                p.lock_acquired_at = Some(at);
            }),
            HolderUpdate::Blocked(blocked) => ctx.progress::<LongTransactionProgress>(|p| {
                if !blocked.is_empty() {
                    debug!(count = blocked.len(), "Queries blocked by lock holder");
                }
                p.blocked_count = blocked.len();
                p.blocked_queries = blocked.clone();
            }),
            HolderUpdate::Released { by_stop } => ctx.progress::<LongTransactionProgress>(|p| {
                p.released = true;
                p.released_by_stop = by_stop;
            }),
        }
    }
}

#[async_trait]
impl AttackRunner for LongTransactionRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::LongTransaction
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let duration = params.duration();
        let params = match params {
            AttackParameters::LongTransaction(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };

        let target = LockTarget::from_params(&params, ctx.id);
        ctx.progress::<LongTransactionProgress>(|p| {
            p.lock_mode = Some(target.lock_mode().to_string());
            p.locked_table = target.table().map(str::to_string);
            p.lock_id = target.advisory_id();
        })?;

        let (updates, mut update_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let hold = LockHold {
            database: ctx.collaborators.databases.connect(&params.database_url),
            target,
            duration,
            poll_interval: ctx.config.lock_holder.poll_interval(),
            cancel: ctx.cancel_token().clone(),
            updates,
        };

        let span = tracing::Span::current();
        std::thread::Builder::new()
            .name(format!("lock-holder-{}", ctx.id.short()))
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(hold.run().instrument(span)),
                    Err(e) => Err(DatabaseError::Connection(format!(
                        "failed to start lock holder runtime: {}",
                        e
                    ))),
                };
                let _ = done_tx.send(result);
            })
            .map_err(|e| AttackError::Execution(format!("failed to spawn lock holder thread: {}", e)))?;

        while let Some(update) = update_rx.recv().await {
            if let Err(e) = Self::apply(&ctx, update) {
                warn!(error = %e, "Failed to record lock holder progress");
            }
        }

        let end = done_rx
            .await
            .map_err(|_| AttackError::Execution("lock holder thread exited without a result".to_string()))??;

        match end {
            HolderEnd::NotAcquired => Err(AttackError::Cancelled),
            HolderEnd::Completed => Ok(RunOutcome::Finished(AttackState::Completed)),
            HolderEnd::Stopped => Ok(RunOutcome::Finished(AttackState::RolledBack)),
        }
    }
}
