// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod attack_service;
pub mod context;
pub mod rollback;
pub mod runners;
pub mod supervisor;
pub mod verification;

// Re-export the service surface for convenience
pub use attack_service::{AttackService, AttackServiceError, StandardAttackService, StopOptions, StopOutcome};
pub use context::{AttackError, Collaborators};
