// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`aegis-chaos-core`)
//!
//! HTTP surface that translates external requests into attack service calls.
//! **No attack logic lives here**; all real work is delegated to
//! [`AttackService`](crate::application::AttackService).
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Axum router: start/status/stop per kind, probe, listing, SSE events, health |
//! | [`params`] | Query-string parameters per attack kind, with defaults |

pub mod api;
pub mod params;
