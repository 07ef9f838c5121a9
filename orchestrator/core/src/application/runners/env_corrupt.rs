// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use tracing::{info, warn};

use super::{finish_or_schedule, parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::parameters::{AttackParameters, EnvFailureType};
use crate::domain::progress::EnvCorruptProgress;
use crate::domain::runtime::ServiceRef;
use crate::domain::sanitize::sanitize_message;
use crate::domain::target::ENV_PROBE_PATH;
use crate::domain::verification::Verification;

/// Removes or corrupts one variable in the target's env file and restarts the
/// compose service so the change takes effect.
pub struct EnvCorruptRunner;

#[async_trait]
impl AttackRunner for EnvCorruptRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::EnvCorrupt
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let duration = params.duration();
        let params = match params {
            AttackParameters::EnvCorrupt(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };
        let id = ctx.id;
        let store = ctx.collaborators.env_files.clone();

        let snapshot = {
            let (store, records, path) = (store.clone(), ctx.records.clone(), params.env_file.clone());
            ctx.shielded(async move {
                let snapshot = store.snapshot(&path, id).await?;
                records.update_progress::<EnvCorruptProgress, _>(id, |p| {
                    p.env_file = Some(path.clone());
                    p.backup_path = snapshot.backup_path.clone();
                    p.file_existed = snapshot.existed();
                    p.snapshot_taken = true;
                })?;
                Ok(snapshot)
            })
            .await?
        };
        info!(
            env_file = %params.env_file.display(),
            existed = snapshot.existed(),
            "Env file snapshot taken"
        );
        ctx.transition(AttackState::Running)?;

        let (value, action) = match params.failure_type {
            EnvFailureType::Missing => (None, "removed"),
            EnvFailureType::Wrong => (Some(params.wrong_value.clone()), "set_wrong_value"),
        };
        {
            let (records, path, name) = (ctx.records.clone(), params.env_file.clone(), params.env_var_name.clone());
            ctx.shielded(async move {
                let rewrite = store.rewrite(&path, id, &name, value.as_deref()).await?;
                records.update_progress::<EnvCorruptProgress, _>(id, |p| {
                    p.action = Some(action.to_string());
                    p.original_value = rewrite.original_value.clone();
                    p.original_value_present = rewrite.found;
                    p.file_mutated = true;
                })?;
                Ok(())
            })
            .await?;
        }
        info!(variable = %params.env_var_name, action, "Env file corrupted");

        let service = ServiceRef::from_compose_file(params.compose_file.as_deref(), params.compose_service.clone());
        let runtime = ctx.collaborators.runtime.clone();
        let restarted = ctx
            .shielded(async move { runtime.restart_service(&service).await.map_err(AttackError::from) })
            .await?;
        info!(containers = ?restarted, "Restarted service to apply corrupted env");
        ctx.progress::<EnvCorruptProgress>(|p| p.restarted_containers = restarted.clone())?;
        ctx.sleep(ctx.config.timings.post_restart_settle()).await?;

        let probe = ctx
            .collaborators
            .target
            .probe_endpoint(&params.target_base_url, ENV_PROBE_PATH)
            .await;
        let verification = match probe {
            Ok(probe) => {
                let status = probe.status_code;
                ctx.progress::<EnvCorruptProgress>(|p| {
                    p.test_endpoint_status = Some(status);
                    p.test_endpoint_response = Some(probe.body.clone());
                })?;
                Verification::endpoint_failure(Some(status), None)
            }
            Err(e) => {
                let message = sanitize_message(&e.to_string());
                warn!(error = %message, "Env probe endpoint unreachable");
                ctx.progress::<EnvCorruptProgress>(|p| p.test_endpoint_error = Some(message.clone()))?;
                Verification::endpoint_failure(None, Some(message))
            }
        };
        ctx.verify(verification)?;

        Ok(finish_or_schedule(duration, AttackState::Completed))
    }
}
