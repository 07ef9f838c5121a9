// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::{finish_or_schedule, parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::parameters::{AttackParameters, MigrationFailureType};
use crate::domain::progress::MigrationCorruptProgress;
use crate::domain::verification::{Verification, VerificationPhase};

pub const INVALID_VERSION: &str = "999_invalid_chaos_migration";
pub const FUTURE_VERSION: &str = "999_future_chaos_migration";
/// First revision of the target's migration history.
pub const INITIAL_REVISION: &str = "001";

/// Overwrites the target's schema-version marker.
pub struct MigrationCorruptRunner;

#[async_trait]
impl AttackRunner for MigrationCorruptRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::MigrationCorrupt
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let duration = params.duration();
        let params = match params {
            AttackParameters::MigrationCorrupt(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };
        let database = ctx.collaborators.databases.connect(&params.database_url);

        let original = database.read_schema_version().await?;
        let head = match params.failure_type {
            MigrationFailureType::DbBehindCode => {
                match ctx.collaborators.target.migration_head(&params.target_base_url).await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!(error = %e, fallback = INITIAL_REVISION, "Migration head unavailable");
                        None
                    }
                }
            }
            _ => None,
        };
        let corrupted = match params.failure_type {
            MigrationFailureType::InvalidVersion => Some(INVALID_VERSION.to_string()),
            MigrationFailureType::MissingVersion => None,
            MigrationFailureType::FutureVersion => Some(FUTURE_VERSION.to_string()),
            MigrationFailureType::DbBehindCode => {
                if head.as_deref() == Some(INITIAL_REVISION) {
                    return Err(AttackError::Precondition(format!(
                        "code head is already at the initial revision {}; the database cannot be behind it",
                        INITIAL_REVISION
                    )));
                }
                Some(INITIAL_REVISION.to_string())
            }
        };

        ctx.progress::<MigrationCorruptProgress>(|p| {
            p.snapshot_taken = true;
            p.original_version = original.clone();
            p.head_version = head.clone();
        })?;
        info!(original = ?original, corrupted = ?corrupted, "Schema version snapshot taken");
        ctx.transition(AttackState::Running)?;

        ctx.progress::<MigrationCorruptProgress>(|p| p.corruption_attempted = true)?;
        {
            let (database, records, id) = (database.clone(), ctx.records.clone(), ctx.id);
            let corrupted = corrupted.clone();
            ctx.shielded(async move {
                database.write_schema_version(corrupted.as_deref()).await?;
                records.update_progress::<MigrationCorruptProgress, _>(id, |p| {
                    p.corrupted_version = corrupted.clone();
                    p.corrupted_at = Some(Utc::now());
                })?;
                Ok(())
            })
            .await?;
        }

        let observed = database.read_schema_version().await?;
        ctx.verify(Verification::read_back(VerificationPhase::Attack, corrupted, observed))?;

        Ok(finish_or_schedule(duration, AttackState::Completed))
    }
}
