// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use tracing::debug;

use crate::domain::config::LivenessConfig;
use crate::domain::target::TargetClient;

/// Poll the liveness probe until it reports `expect_up` or the attempt budget
/// runs out. Returns the last observation and the attempts used.
pub async fn await_liveness(
    target: &dyn TargetClient,
    base_url: &str,
    expect_up: bool,
    config: &LivenessConfig,
) -> (bool, u32) {
    let mut observed_up = !expect_up;
    for attempt in 1..=config.max_attempts {
        observed_up = target.probe_liveness(base_url).await;
        debug!(attempt, observed_up, expect_up, "Liveness probe");
        if observed_up == expect_up {
            return (observed_up, attempt);
        }
        if attempt < config.max_attempts {
            tokio::time::sleep(config.interval()).await;
        }
    }
    (observed_up, config.max_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::target::{
        EndpointProbe, HoldResponse, RateLimitConfig, RateLimitConfigUpdate, RequestOutcome, TargetError,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Comes up on the n-th probe.
    struct UpAfter {
        n: u32,
        probes: AtomicU32,
    }

    #[async_trait]
    impl TargetClient for UpAfter {
        async fn hold_connection(&self, _: &str, _: u32) -> Result<HoldResponse, TargetError> {
            unimplemented!()
        }
        async fn probe_liveness(&self, _: &str) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst) + 1 >= self.n
        }
        async fn probe_endpoint(&self, _: &str, _: &str) -> Result<EndpointProbe, TargetError> {
            unimplemented!()
        }
        async fn rate_limit_config(&self, _: &str) -> Result<RateLimitConfig, TargetError> {
            unimplemented!()
        }
        async fn update_rate_limit_config(
            &self,
            _: &str,
            _: &RateLimitConfigUpdate,
        ) -> Result<RateLimitConfig, TargetError> {
            unimplemented!()
        }
        async fn rate_limit_stats(&self, _: &str) -> Result<Value, TargetError> {
            unimplemented!()
        }
        async fn send_request(&self, _: &str, _: &str) -> RequestOutcome {
            unimplemented!()
        }
        async fn migration_head(&self, _: &str) -> Result<Option<String>, TargetError> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_polling_once_expectation_met() {
        let target = UpAfter {
            n: 3,
            probes: AtomicU32::new(0),
        };
        let (up, attempts) = await_liveness(&target, "http://t", true, &LivenessConfig::default()).await;
        assert!(up);
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_reports_last_observation() {
        let target = UpAfter {
            n: 100,
            probes: AtomicU32::new(0),
        };
        let config = LivenessConfig {
            max_attempts: 4,
            ..Default::default()
        };
        let (up, attempts) = await_liveness(&target, "http://t", true, &config).await;
        assert!(!up);
        assert_eq!(attempts, 4);
        assert_eq!(target.probes.load(Ordering::SeqCst), 4);
    }
}
