// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue control: the admission gate and statistics

use super::format_time;
use anyhow::Result;
use clap::{Args, Subcommand};
use netq_store::Database;
use std::time::Duration;

#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommand,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Allow workers to reserve tasks again
    Start {
        /// Allow all workers
        #[arg(long, conflicts_with = "allow_only")]
        allow_all: bool,
        /// Allow only workers with this name
        #[arg(long)]
        allow_only: Option<String>,
    },
    /// Stop all workers from reserving further tasks
    Stop {
        /// Do not wait for in-flight tasks to finish
        #[arg(long)]
        no_wait: bool,
    },
    /// Show queue statistics and the current admission policy
    Stats,
}

pub fn run(db: &Database, args: QueueArgs) -> Result<()> {
    match args.command {
        QueueCommand::Start {
            allow_all,
            allow_only,
        } => {
            match (allow_all, allow_only) {
                (true, None) => db.allow_all_workers()?,
                (false, Some(name)) => db.allow_only_worker(&name)?,
                _ => anyhow::bail!("specify exactly one of --allow-all and --allow-only"),
            }
            println!("queue started: {}", db.admission_policy()?);
        }

        QueueCommand::Stop { no_wait } => {
            db.allow_no_workers()?;
            if !no_wait {
                wait_for_drain(db)?;
            }
            println!("queue stopped");
        }

        QueueCommand::Stats => {
            let stats = db.task_stats()?;
            println!("queued:       {}", stats.num_queued);
            println!("in progress:  {}", stats.num_in_progress);
            println!("reserved:     {}", stats.num_reserved);
            match stats.oldest_not_done_added_at {
                Some(added_at) => println!("oldest:       {}", format_time(added_at)),
                None => println!("oldest:       (none pending)"),
            }
            println!("admission:    {}", stats.policy);
        }
    }
    Ok(())
}

/// Poll until every reservation is gone. Reservations only disappear when
/// their workers finish, so this is how an operator knows the queue is
/// quiet enough for maintenance.
fn wait_for_drain(db: &Database) -> Result<()> {
    loop {
        let stats = db.task_stats()?;
        if stats.num_reserved == 0 {
            return Ok(());
        }
        println!("still {} task(s) reserved", stats.num_reserved);
        std::thread::sleep(Duration::from_secs(5));
    }
}
