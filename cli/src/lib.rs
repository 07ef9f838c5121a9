// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Library half of the `aegis-chaos` binary: server wiring, the HTTP client
//! used by `attack` subcommands, and the command handlers.

pub mod client;
pub mod commands;
pub mod server;
