// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-kind progress payloads carried by an [`AttackRecord`](crate::domain::attack::AttackRecord).
//!
//! Everything a rollback needs is written here before the runner mutates the
//! target, so the undo path never depends on the runner still being alive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::domain::attack::{AttackKind, DomainError};
use crate::domain::database::{BlockedQuery, LockProbe};
use crate::domain::target::{RateLimitConfig, RequestOutcome};

/// Responses kept from each end of a flood.
pub const FLOOD_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AttackProgress {
    PoolFlood(PoolFloodProgress),
    ProcessCrash(ProcessCrashProgress),
    EnvCorrupt(EnvCorruptProgress),
    LongTransaction(LongTransactionProgress),
    MigrationCorrupt(MigrationCorruptProgress),
    RateLimitFlood(RateLimitFloodProgress),
}

impl AttackProgress {
    pub fn for_kind(kind: AttackKind) -> Self {
        match kind {
            AttackKind::PoolFlood => AttackProgress::PoolFlood(Default::default()),
            AttackKind::ProcessCrash => AttackProgress::ProcessCrash(Default::default()),
            AttackKind::EnvCorrupt => AttackProgress::EnvCorrupt(Default::default()),
            AttackKind::LongTransaction => AttackProgress::LongTransaction(Default::default()),
            AttackKind::MigrationCorrupt => AttackProgress::MigrationCorrupt(Default::default()),
            AttackKind::RateLimitFlood => AttackProgress::RateLimitFlood(Default::default()),
        }
    }

    pub fn kind(&self) -> AttackKind {
        match self {
            AttackProgress::PoolFlood(_) => AttackKind::PoolFlood,
            AttackProgress::ProcessCrash(_) => AttackKind::ProcessCrash,
            AttackProgress::EnvCorrupt(_) => AttackKind::EnvCorrupt,
            AttackProgress::LongTransaction(_) => AttackKind::LongTransaction,
            AttackProgress::MigrationCorrupt(_) => AttackKind::MigrationCorrupt,
            AttackProgress::RateLimitFlood(_) => AttackKind::RateLimitFlood,
        }
    }

    /// Damage was applied (or may have been, for a write in flight) and has
    /// not been undone yet.
    pub fn needs_rollback(&self) -> bool {
        match self {
            AttackProgress::PoolFlood(_) | AttackProgress::LongTransaction(_) => false,
            AttackProgress::ProcessCrash(p) => p.container_stopped && !p.restored,
            AttackProgress::EnvCorrupt(p) => p.snapshot_taken && !p.restored,
            AttackProgress::MigrationCorrupt(p) => p.snapshot_taken && !p.restored,
            AttackProgress::RateLimitFlood(p) => p.config_pushed && !p.restored,
        }
    }

    /// Typed mutable access to the payload of kind `P`.
    pub fn payload_mut<P: KindProgress>(&mut self) -> Result<&mut P, DomainError> {
        let actual = self.kind();
        P::from_progress_mut(self).ok_or(DomainError::ProgressMismatch {
            expected: P::KIND,
            actual,
        })
    }

    pub fn payload<P: KindProgress>(&self) -> Result<&P, DomainError> {
        let actual = self.kind();
        P::from_progress(self).ok_or(DomainError::ProgressMismatch {
            expected: P::KIND,
            actual,
        })
    }
}

/// Implemented by each per-kind payload.
pub trait KindProgress: Sized {
    const KIND: AttackKind;
    fn from_progress(progress: &AttackProgress) -> Option<&Self>;
    fn from_progress_mut(progress: &mut AttackProgress) -> Option<&mut Self>;
}

macro_rules! kind_progress {
    ($ty:ty, $variant:ident) => {
        impl KindProgress for $ty {
            const KIND: AttackKind = AttackKind::$variant;

            fn from_progress(progress: &AttackProgress) -> Option<&Self> {
                match progress {
                    AttackProgress::$variant(p) => Some(p),
                    _ => None,
                }
            }

            fn from_progress_mut(progress: &mut AttackProgress) -> Option<&mut Self> {
                match progress {
                    AttackProgress::$variant(p) => Some(p),
                    _ => None,
                }
            }
        }
    };
}

kind_progress!(PoolFloodProgress, PoolFlood);
kind_progress!(ProcessCrashProgress, ProcessCrash);
kind_progress!(EnvCorruptProgress, EnvCorrupt);
kind_progress!(LongTransactionProgress, LongTransaction);
kind_progress!(MigrationCorruptProgress, MigrationCorrupt);
kind_progress!(RateLimitFloodProgress, RateLimitFlood);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldResult {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolFloodProgress {
    pub results: Vec<HoldResult>,
    pub succeeded: u32,
    pub errored: u32,
}

impl PoolFloodProgress {
    pub fn record(&mut self, result: HoldResult) {
        if result.error.is_none() {
            self.succeeded += 1;
        } else {
            self.errored += 1;
        }
        self.results.push(result);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessCrashProgress {
    pub container_was_running: bool,
    /// Set before the stop call is issued.
    pub container_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_verified_down: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_verified_up: Option<bool>,
    pub restarted: bool,
    pub restored: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvCorruptProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<PathBuf>,
    #[serde(skip)]
    pub backup_path: Option<PathBuf>,
    pub file_existed: bool,
    pub snapshot_taken: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Never serialized: the value may be a credential.
    #[serde(skip)]
    pub original_value: Option<String>,
    pub original_value_present: bool,
    pub file_mutated: bool,
    pub restarted_containers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_endpoint_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_endpoint_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_endpoint_error: Option<String>,
    /// The file content is back; only the service restart may be pending.
    pub file_restored: bool,
    pub restored: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LongTransactionProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_locked: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub blocked_queries: Vec<BlockedQuery>,
    pub blocked_count: usize,
    pub released: bool,
    pub released_by_stop: bool,
    pub probes: Vec<LockProbe>,
    pub force_killed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationCorruptProgress {
    pub snapshot_taken: bool,
    /// `None` when the marker was missing before the attack.
    pub original_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_version: Option<String>,
    /// Set before the write is issued.
    pub corruption_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupted_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrupted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_version: Option<String>,
    pub restored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FloodSample {
    pub request: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FloodTally {
    pub total_sent: u32,
    pub successful: u32,
    pub rate_limited: u32,
    pub errors: u32,
    pub samples: Vec<FloodSample>,
}

impl FloodTally {
    /// Count one response; the first and last [`FLOOD_SAMPLE_SIZE`] of
    /// `planned` requests are kept as samples.
    pub fn record(&mut self, planned: u32, outcome: RequestOutcome) {
        self.total_sent += 1;
        let request = self.total_sent;
        let sample = match outcome {
            RequestOutcome::Status(code) => {
                match code {
                    429 => self.rate_limited += 1,
                    200..=299 => self.successful += 1,
                    _ => self.errors += 1,
                }
                FloodSample {
                    request,
                    status_code: Some(code),
                    error: None,
                }
            }
            RequestOutcome::Failed(error) => {
                self.errors += 1;
                FloodSample {
                    request,
                    status_code: None,
                    error: Some(error),
                }
            }
        };
        let sample_size = FLOOD_SAMPLE_SIZE as u32;
        if request <= sample_size || request > planned.saturating_sub(sample_size) {
            self.samples.push(sample);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimitFloodProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_config: Option<RateLimitConfig>,
    /// Set before the restrictive configuration is pushed.
    pub config_pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictive_config: Option<RateLimitConfig>,
    pub flood: FloodTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_config: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_test: Option<FloodTally>,
    pub restored: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access_checks_kind() {
        let mut progress = AttackProgress::for_kind(AttackKind::EnvCorrupt);
        progress.payload_mut::<EnvCorruptProgress>().unwrap().snapshot_taken = true;
        assert!(progress.payload::<EnvCorruptProgress>().unwrap().snapshot_taken);
        let err = progress.payload_mut::<PoolFloodProgress>().unwrap_err();
        assert_eq!(
            err,
            DomainError::ProgressMismatch {
                expected: AttackKind::PoolFlood,
                actual: AttackKind::EnvCorrupt
            }
        );
    }

    #[test]
    fn test_env_progress_never_serializes_original_value() {
        let progress = EnvCorruptProgress {
            original_value: Some("sk-live-123".to_string()),
            original_value_present: true,
            backup_path: Some(PathBuf::from("/tmp/.env.backup")),
            ..Default::default()
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(!json.contains("sk-live-123"));
        assert!(!json.contains("backup"));
        assert!(json.contains("\"original_value_present\":true"));
    }

    #[test]
    fn test_flood_tally_classifies_and_samples_both_ends() {
        let mut tally = FloodTally::default();
        for i in 0..20u32 {
            let outcome = match i {
                0..=4 => RequestOutcome::Status(200),
                17 => RequestOutcome::Failed("connection reset".into()),
                _ => RequestOutcome::Status(429),
            };
            tally.record(20, outcome);
        }
        assert_eq!(tally.total_sent, 20);
        assert_eq!(tally.successful, 5);
        assert_eq!(tally.rate_limited, 14);
        assert_eq!(tally.errors, 1);
        let requests: Vec<u32> = tally.samples.iter().map(|s| s.request).collect();
        assert_eq!(requests, vec![1, 2, 3, 4, 5, 16, 17, 18, 19, 20]);
        assert_eq!(tally.samples[7].error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_rollback_needed_only_after_damage() {
        assert!(!AttackProgress::for_kind(AttackKind::PoolFlood).needs_rollback());
        assert!(!AttackProgress::for_kind(AttackKind::LongTransaction).needs_rollback());
        let mut progress = AttackProgress::for_kind(AttackKind::RateLimitFlood);
        assert!(!progress.needs_rollback());
        progress.payload_mut::<RateLimitFloodProgress>().unwrap().config_pushed = true;
        assert!(progress.needs_rollback());
        progress.payload_mut::<RateLimitFloodProgress>().unwrap().restored = true;
        assert!(!progress.needs_rollback());
    }
}
