// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Chaos Core
//!
//! Fault-injection attack engine: starts attacks against a target system,
//! tracks each attack's lifecycle record, undoes the damage on stop or after a
//! timer, and verifies that both the attack and the recovery were observable.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** `domain` (records, state machine, ports), `application`
//!   (service, supervisor, runners, rollback), `infrastructure` (Docker,
//!   HTTP, PostgreSQL, env files, in-memory store), `presentation` (axum)

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
