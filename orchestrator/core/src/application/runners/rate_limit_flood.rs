// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use super::{finish_or_schedule, parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::parameters::AttackParameters;
use crate::domain::progress::{FloodTally, RateLimitFloodProgress};
use crate::domain::target::{RateLimitConfigUpdate, TargetClient};
use crate::domain::verification::Verification;

/// Send `count` sequential requests paced at `rate` per second, reporting the
/// running tally after each response.
pub(crate) async fn send_burst(
    target: &dyn TargetClient,
    base_url: &str,
    endpoint: &str,
    count: u32,
    rate: f64,
    mut on_response: impl FnMut(&FloodTally),
) -> FloodTally {
    let pause = Duration::from_secs_f64(1.0 / rate);
    let mut tally = FloodTally::default();
    for request in 0..count {
        if request > 0 {
            tokio::time::sleep(pause).await;
        }
        let outcome = target.send_request(base_url, endpoint).await;
        tally.record(count, outcome);
        on_response(&tally);
    }
    tally
}

/// Pushes a restrictive rate limit to the target and floods past it.
pub struct RateLimitFloodRunner;

#[async_trait]
impl AttackRunner for RateLimitFloodRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::RateLimitFlood
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let duration = params.duration();
        let params = match params {
            AttackParameters::RateLimitFlood(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };
        let target = ctx.collaborators.target.clone();
        let base_url = params.target_base_url.clone();

        let original = target.rate_limit_config(&base_url).await?;
        ctx.progress::<RateLimitFloodProgress>(|p| p.original_config = Some(original.clone()))?;
        info!(original = ?original, "Rate limit config saved");
        ctx.transition(AttackState::Running)?;

        let update = RateLimitConfigUpdate {
            enabled: Some(true),
            max_requests: Some(params.max_requests),
            window_seconds: Some(params.window_seconds),
        };
        ctx.progress::<RateLimitFloodProgress>(|p| p.config_pushed = true)?;
        let applied = {
            let (target, base_url) = (target.clone(), base_url.clone());
            ctx.shielded(async move {
                target
                    .update_rate_limit_config(&base_url, &update)
                    .await
                    .map_err(AttackError::from)
            })
            .await?
        };
        ctx.progress::<RateLimitFloodProgress>(|p| p.restrictive_config = Some(applied.clone()))?;
        if applied.max_requests != params.max_requests {
            return Err(AttackError::Execution(format!(
                "target applied max_requests={} instead of {}",
                applied.max_requests, params.max_requests
            )));
        }
        ctx.sleep(ctx.config.timings.post_config_settle()).await?;

        info!(
            flood_requests = params.flood_requests,
            flood_rate = params.flood_rate,
            endpoint = %params.target_endpoint,
            "Flooding rate-limited endpoint"
        );
        let tally = send_burst(
            target.as_ref(),
            &base_url,
            &params.target_endpoint,
            params.flood_requests,
            params.flood_rate,
            |tally| {
                if let Err(e) = ctx.progress::<RateLimitFloodProgress>(|p| p.flood = tally.clone()) {
                    warn!(error = %e, "Failed to record flood progress");
                }
            },
        )
        .await;
        info!(
            sent = tally.total_sent,
            rate_limited = tally.rate_limited,
            successful = tally.successful,
            errors = tally.errors,
            "Flood finished"
        );

        match target.rate_limit_stats(&base_url).await {
            Ok(stats) => ctx.progress::<RateLimitFloodProgress>(|p| p.target_stats = Some(stats.clone()))?,
            Err(e) => warn!(error = %e, "Failed to read rate limit stats"),
        }

        ctx.verify(Verification::rate_limited(
            params.expected_rate_limited(),
            u64::from(tally.rate_limited),
            ctx.config.verification.rate_limit_tolerance,
        ))?;

        Ok(finish_or_schedule(duration, AttackState::Completed))
    }
}
