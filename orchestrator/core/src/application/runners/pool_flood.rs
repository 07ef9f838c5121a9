// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::info;

use super::{parameter_mismatch, AttackRunner, RunOutcome};
use crate::application::context::{AttackError, RunContext};
use crate::domain::attack::{AttackKind, AttackState};
use crate::domain::parameters::AttackParameters;
use crate::domain::progress::{HoldResult, PoolFloodProgress};
use crate::domain::sanitize::sanitize_message;

/// Opens `connections` concurrent holds on the target's pool endpoint and
/// waits for every one of them to come back.
pub struct PoolFloodRunner;

#[async_trait]
impl AttackRunner for PoolFloodRunner {
    fn kind(&self) -> AttackKind {
        AttackKind::PoolFlood
    }

    async fn run(&self, ctx: RunContext, params: AttackParameters) -> Result<RunOutcome, AttackError> {
        let params = match params {
            AttackParameters::PoolFlood(params) => params,
            other => return Err(parameter_mismatch(self.kind(), &other)),
        };

        ctx.transition(AttackState::Running)?;
        info!(
            connections = params.connections,
            hold_seconds = params.hold_seconds,
            "Flooding connection pool"
        );

        let mut holds: FuturesUnordered<_> = (0..params.connections)
            .map(|index| {
                let target = ctx.collaborators.target.clone();
                let base_url = params.target_base_url.clone();
                let seconds = params.hold_seconds;
                async move { (index, target.hold_connection(&base_url, seconds).await) }
            })
            .collect();

        while let Some((index, response)) = holds.next().await {
            let result = match response {
                Ok(response) => HoldResult {
                    index,
                    status_code: Some(response.status_code),
                    body: Some(response.body),
                    error: None,
                },
                Err(e) => HoldResult {
                    index,
                    status_code: None,
                    body: None,
                    error: Some(sanitize_message(&e.to_string())),
                },
            };
            ctx.progress::<PoolFloodProgress>(|progress| progress.record(result.clone()))?;
        }

        ctx.progress::<PoolFloodProgress>(|progress| progress.results.sort_by_key(|r| r.index))?;
        info!("All pool holds returned");
        Ok(RunOutcome::Finished(AttackState::Completed))
    }
}
