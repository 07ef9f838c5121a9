// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use tracing::{info, warn};

use super::{finish_or_schedule, parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::application::verification::await_liveness;
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::parameters::{AttackParameters, CrashType};
use crate::domain::progress::ProcessCrashProgress;
use crate::domain::verification::{Verification, VerificationPhase};

/// Stops or restarts the target container and records whether the API
/// actually went down (or came back).
pub struct ProcessCrashRunner;

#[async_trait]
impl AttackRunner for ProcessCrashRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::ProcessCrash
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let duration = params.duration();
        let params = match params {
            AttackParameters::ProcessCrash(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };
        let runtime = ctx.collaborators.runtime.clone();
        let target = ctx.collaborators.target.clone();
        let name = params.container_name.clone();

        if !runtime.is_running(&name).await? {
            return Err(AttackError::Precondition(format!("container '{}' is not running", name)));
        }
        ctx.progress::<ProcessCrashProgress>(|p| p.container_was_running = true)?;

        match params.crash_type {
            CrashType::Stop => {
                ctx.progress::<ProcessCrashProgress>(|p| p.container_stopped = true)?;
                ctx.transition(AttackState::Running)?;

                info!(container = %name, "Stopping container");
                let stop_name = name.clone();
                ctx.shielded(async move { runtime.stop(&stop_name).await.map_err(AttackError::from) })
                    .await?;
                ctx.sleep(ctx.config.timings.post_stop_settle()).await?;

                let (observed_up, attempts) =
                    await_liveness(target.as_ref(), &params.target_base_url, false, &ctx.config.liveness).await;
                if observed_up {
                    warn!(container = %name, attempts, "API still answers after container stop");
                }
                ctx.progress::<ProcessCrashProgress>(|p| p.api_verified_down = Some(!observed_up))?;
                ctx.verify(Verification::liveness(VerificationPhase::Attack, false, observed_up, attempts))?;

                Ok(finish_or_schedule(duration, AttackState::Crashed))
            }
            CrashType::Restart => {
                ctx.transition(AttackState::Running)?;

                info!(container = %name, "Restarting container");
                let restart_name = name.clone();
                ctx.shielded(async move { runtime.restart(&restart_name).await.map_err(AttackError::from) })
                    .await?;
                ctx.progress::<ProcessCrashProgress>(|p| p.restarted = true)?;
                ctx.sleep(ctx.config.timings.post_restart_settle()).await?;

                let (observed_up, attempts) =
                    await_liveness(target.as_ref(), &params.target_base_url, true, &ctx.config.liveness).await;
                ctx.progress::<ProcessCrashProgress>(|p| {
                    p.api_verified_up = Some(observed_up);
                    p.restored = observed_up;
                })?;
                ctx.verify(Verification::liveness(VerificationPhase::Attack, true, observed_up, attempts))?;

                let state = if observed_up {
                    AttackState::Completed
                } else {
                    AttackState::PartiallyRecovered
                };
                Ok(RunOutcome::Finished(state))
            }
        }
    }
}
