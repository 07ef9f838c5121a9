// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod env_file;
pub mod event_bus;
pub mod repositories;
pub mod runtime;
pub mod target_client;

pub use db::PgDatabaseProvider;
pub use env_file::EnvFileStore;
pub use event_bus::EventBus;
pub use repositories::InMemoryAttackRepository;
pub use runtime::DockerRuntime;
pub use target_client::HttpTargetClient;
