// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Attack aggregate, its lifecycle, and the ports the engine drives.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits; no I/O

pub mod attack;
pub mod config;
pub mod database;
pub mod events;
pub mod parameters;
pub mod progress;
pub mod repository;
pub mod runtime;
pub mod sanitize;
pub mod target;
pub mod verification;
