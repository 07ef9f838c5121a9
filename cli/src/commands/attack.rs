// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Attack commands against a running chaos server
//!
//! Commands: start, status, stop, probe, list

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::Value;

use aegis_chaos_core::domain::attack::{AttackId, AttackKind};

use crate::client::ChaosClient;

#[derive(Subcommand)]
pub enum AttackCommand {
    /// Start an attack
    Start {
        /// Attack kind (canonical or legacy name)
        kind: AttackKind,

        /// Attack parameter as key=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Show an attack record
    Status {
        kind: AttackKind,
        attack_id: AttackId,
    },

    /// Stop an attack and roll back its damage
    Stop {
        kind: AttackKind,
        attack_id: AttackId,

        /// Terminate a lock holder that ignores the stop signal
        #[arg(long)]
        force_kill: bool,

        /// Retry the rollback of a failed attack
        #[arg(long)]
        retry: bool,
    },

    /// Try the advisory lock of a long-transaction attack from another session
    Probe { attack_id: AttackId },

    /// List attack records
    List {
        /// Only attacks of this kind
        #[arg(long = "type")]
        kind: Option<AttackKind>,
    },
}

pub async fn handle_command(command: AttackCommand, host: &str, port: u16) -> Result<()> {
    let client = ChaosClient::new(host, port)?;

    if !client.health().await? {
        anyhow::bail!("Chaos server is not reachable at {}:{}", host, port);
    }

    match command {
        AttackCommand::Start { kind, params } => {
            let body = client.start(kind, &params).await?;
            let id = body["attack_id"].as_str().unwrap_or("?");
            println!("{}", format!("✓ {} attack started: {}", kind, id).green());
        }
        AttackCommand::Status { kind, attack_id } => {
            let body = client.status(kind, attack_id).await?;
            println!("{} {}", "State:".bold(), colored_state(&body["state"]));
            print_json(&body)?;
        }
        AttackCommand::Stop {
            kind,
            attack_id,
            force_kill,
            retry,
        } => {
            let body = client.stop(kind, attack_id, force_kill, retry).await?;
            let status = body["status"].as_str().unwrap_or("?");
            println!("{} {}", "Stop:".bold(), status);
            println!("{} {}", "State:".bold(), colored_state(&body["state"]));
        }
        AttackCommand::Probe { attack_id } => {
            let body = client.probe(attack_id).await?;
            let acquired = body["lock_acquired"].as_bool().unwrap_or(false);
            let verdict = if acquired {
                "lock acquired (not held)".yellow()
            } else {
                "lock is held".green()
            };
            println!("Lock {}: {}", body["lock_id"], verdict);
        }
        AttackCommand::List { kind } => {
            let body = client.list(kind).await?;
            let attacks = body["attacks"].as_array().cloned().unwrap_or_default();
            if attacks.is_empty() {
                println!("{}", "No attacks".dimmed());
            }
            for attack in attacks {
                println!(
                    "{}  {:<18} {}",
                    attack["id"].as_str().unwrap_or("?"),
                    attack["type"].as_str().unwrap_or("?"),
                    colored_state(&attack["state"]),
                );
            }
        }
    }

    Ok(())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' in '{}'", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn colored_state(state: &Value) -> colored::ColoredString {
    let state = state.as_str().unwrap_or("?");
    match state {
        "starting" | "running" | "rolling_back" => state.cyan(),
        "completed" | "rolled_back" => state.green(),
        "partially_recovered" | "cancelled" | "force_killed" => state.yellow(),
        _ => state.red(),
    }
}

fn print_json(value: &Value) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value).context("Failed to render response")?;
    println!("{}", pretty);
    Ok(())
}
