// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock inspection and manual recovery
//!
//! Locks have no expiry, so a crashed worker leaves its rows behind until
//! an operator clears them. `lock list` shows what is held and since when;
//! `lock clear` removes rows once the operator has confirmed the holder is
//! really gone.

use super::format_time;
use anyhow::Result;
use clap::{Args, Subcommand};
use netq_core::Target;
use netq_store::Database;

#[derive(Args)]
pub struct LockArgs {
    #[command(subcommand)]
    command: LockCommand,
}

#[derive(Subcommand)]
enum LockCommand {
    /// List currently held locks, oldest first
    List,
    /// Forcibly clear locks on the given targets, whoever holds them
    Clear {
        #[arg(required = true)]
        targets: Vec<String>,
    },
}

pub fn run(db: &Database, args: LockArgs) -> Result<()> {
    match args.command {
        LockCommand::List => {
            for lock in db.held_locks()? {
                println!(
                    "{:<30} held by {} since {}",
                    lock.target.to_string(),
                    lock.worker_id,
                    format_time(lock.created_at),
                );
            }
        }

        LockCommand::Clear { targets } => {
            let targets: Vec<Target> = targets.into_iter().map(Target::from_raw).collect();
            let cleared = db.clear_locks(&targets)?;
            println!("cleared {} lock(s)", cleared);
        }
    }
    Ok(())
}
