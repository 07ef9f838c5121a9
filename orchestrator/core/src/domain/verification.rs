// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Verification
//!
//! A verification is the observed effect of an attack (phase `attack`) or of
//! its undo (phase `recovery`). It never changes state by itself; runners and
//! the rollback controller pick the resulting state from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Absorbs float noise when comparing a count against a fractional threshold.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPhase {
    Attack,
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum VerificationCheck {
    /// The flood was rejected by the restrictive rate limit.
    RateLimited {
        expected_429s: u64,
        actual_429s: u64,
        tolerance: f64,
    },
    /// A small burst after restoring went through the original limit.
    RateLimitLifted {
        burst: u64,
        rate_limited: u64,
        threshold: u64,
    },
    Liveness {
        expected_up: bool,
        observed_up: bool,
        attempts: u32,
    },
    /// The value written to the database was read back.
    ReadBack {
        expected: Option<String>,
        observed: Option<String>,
    },
    /// A probe of the target's configuration endpoint after corruption.
    EndpointFailure {
        status_code: Option<u16>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub phase: VerificationPhase,
    pub verified: bool,
    #[serde(flatten)]
    pub check: VerificationCheck,
    pub checked_at: DateTime<Utc>,
}

impl Verification {
    fn new(phase: VerificationPhase, verified: bool, check: VerificationCheck) -> Self {
        Self {
            phase,
            verified,
            check,
            checked_at: Utc::now(),
        }
    }

    /// Verified when at least `tolerance` of the expected rejections happened.
    pub fn rate_limited(expected_429s: u64, actual_429s: u64, tolerance: f64) -> Self {
        let threshold = expected_429s as f64 * tolerance;
        let verified = actual_429s as f64 + THRESHOLD_EPSILON >= threshold;
        Self::new(
            VerificationPhase::Attack,
            verified,
            VerificationCheck::RateLimited {
                expected_429s,
                actual_429s,
                tolerance,
            },
        )
    }

    /// A burst of `restrictive_max + 5` requests should mostly pass once the
    /// original limit is back: fewer than `burst - restrictive_max` rejections.
    pub fn rate_limit_lifted(burst: u64, restrictive_max: u64, rate_limited: u64) -> Self {
        let threshold = burst.saturating_sub(restrictive_max);
        Self::new(
            VerificationPhase::Recovery,
            rate_limited < threshold,
            VerificationCheck::RateLimitLifted {
                burst,
                rate_limited,
                threshold,
            },
        )
    }

    pub fn liveness(phase: VerificationPhase, expected_up: bool, observed_up: bool, attempts: u32) -> Self {
        Self::new(
            phase,
            expected_up == observed_up,
            VerificationCheck::Liveness {
                expected_up,
                observed_up,
                attempts,
            },
        )
    }

    pub fn read_back(phase: VerificationPhase, expected: Option<String>, observed: Option<String>) -> Self {
        Self::new(
            phase,
            expected == observed,
            VerificationCheck::ReadBack { expected, observed },
        )
    }

    /// Verified when the probe failed at transport level or returned non-2xx.
    pub fn endpoint_failure(status_code: Option<u16>, error: Option<String>) -> Self {
        let failed = match status_code {
            Some(code) => !(200..300).contains(&code),
            None => true,
        };
        Self::new(
            VerificationPhase::Attack,
            failed,
            VerificationCheck::EndpointFailure { status_code, error },
        )
    }
}
