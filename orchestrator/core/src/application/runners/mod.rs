// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Runners
//!
//! One runner per attack kind. A runner checks live preconditions, writes the
//! data its rollback needs into the record, moves the record to `running`,
//! applies the fault and reports how the attack should settle. It never
//! leaves a record in an active state: the supervisor settles whatever the
//! runner returns, including errors and panics.
//!
//! | Runner | Placement | Rollback |
//! |--------|-----------|----------|
//! | [`pool_flood`] | cooperative | none |
//! | [`process_crash`] | cooperative | start container (stop mode) |
//! | [`env_corrupt`] | cooperative | restore backup, restart service |
//! | [`long_transaction`] | dedicated thread | release is the undo |
//! | [`migration_corrupt`] | cooperative | rewrite saved marker |
//! | [`rate_limit_flood`] | cooperative | restore saved config |

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState, Placement};
use crate::domain::parameters::AttackParameters;

pub mod env_corrupt;
pub mod long_transaction;
pub mod migration_corrupt;
pub mod pool_flood;
pub mod process_crash;
pub mod rate_limit_flood;

/// How the supervisor settles a runner that returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Move the record to this state.
    Finished(AttackState),
    /// Leave the record `running` and roll back automatically after the delay.
    RollbackAfter(Duration),
}

#[async_trait]
pub trait AttackRunner: Send + Sync {
    fn kind(&self) -> AttackKind;

    fn placement(&self) -> Placement {
        self.kind().placement()
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError>;
}

pub fn runner_for(kind: AttackKind) -> Arc<dyn AttackRunner> {
    match kind {
        AttackKind::PoolFlood => Arc::new(pool_flood::PoolFloodRunner),
        AttackKind::ProcessCrash => Arc::new(process_crash::ProcessCrashRunner),
        AttackKind::EnvCorrupt => Arc::new(env_corrupt::EnvCorruptRunner),
        AttackKind::LongTransaction => Arc::new(long_transaction::LongTransactionRunner),
        AttackKind::MigrationCorrupt => Arc::new(migration_corrupt::MigrationCorruptRunner),
        AttackKind::RateLimitFlood => Arc::new(rate_limit_flood::RateLimitFloodRunner),
    }
}

/// End state for a one-shot attack, or a scheduled rollback when time-boxed.
pub(crate) fn finish_or_schedule(duration: Option<Duration>, finished: AttackState) -> RunOutcome {
    match duration {
        Some(delay) => RunOutcome::RollbackAfter(delay),
        None => RunOutcome::Finished(finished),
    }
}

pub(crate) fn parameter_mismatch(kind: AttackKind, params: &AttackParameters) -> AttackError {
    AttackError::Execution(format!(
        "{} runner received {} parameters",
        kind,
        params.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_runner() {
        for kind in AttackKind::ALL {
            let runner = runner_for(kind);
            assert_eq!(runner.kind(), kind);
            assert_eq!(runner.placement(), kind.placement());
        }
    }

    #[test]
    fn test_time_boxed_attacks_schedule_rollback() {
        assert_eq!(
            finish_or_schedule(Some(Duration::from_secs(3)), AttackState::Completed),
            RunOutcome::RollbackAfter(Duration::from_secs(3))
        );
        assert_eq!(
            finish_or_schedule(None, AttackState::Crashed),
            RunOutcome::Finished(AttackState::Crashed)
        );
    }
}
