// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the aegis-chaos CLI

pub mod attack;
pub mod config;
pub mod serve;

pub use self::attack::AttackCommand;
pub use self::config::ConfigCommand;
