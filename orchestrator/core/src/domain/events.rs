// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::attack::{AttackId, AttackKind, AttackState};
use crate::domain::verification::VerificationPhase;

/// Attack lifecycle events, published on the event bus and streamed to
/// `GET /break/events` subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AttackEvent {
    AttackStarted {
        attack_id: AttackId,
        kind: AttackKind,
        started_at: DateTime<Utc>,
    },
    StateChanged {
        attack_id: AttackId,
        kind: AttackKind,
        from: AttackState,
        to: AttackState,
        changed_at: DateTime<Utc>,
    },
    VerificationRecorded {
        attack_id: AttackId,
        kind: AttackKind,
        phase: VerificationPhase,
        verified: bool,
        recorded_at: DateTime<Utc>,
    },
    LockProbed {
        attack_id: AttackId,
        lock_id: i64,
        lock_acquired: bool,
        probed_at: DateTime<Utc>,
    },
    RecordEvicted {
        attack_id: AttackId,
        evicted_at: DateTime<Utc>,
    },
}

impl AttackEvent {
    pub fn attack_id(&self) -> AttackId {
        match self {
            AttackEvent::AttackStarted { attack_id, .. }
            | AttackEvent::StateChanged { attack_id, .. }
            | AttackEvent::VerificationRecorded { attack_id, .. }
            | AttackEvent::LockProbed { attack_id, .. }
            | AttackEvent::RecordEvicted { attack_id, .. } => *attack_id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AttackEvent::AttackStarted { .. } => "attack_started",
            AttackEvent::StateChanged { .. } => "state_changed",
            AttackEvent::VerificationRecorded { .. } => "verification_recorded",
            AttackEvent::LockProbed { .. } => "lock_probed",
            AttackEvent::RecordEvicted { .. } => "record_evicted",
        }
    }
}
