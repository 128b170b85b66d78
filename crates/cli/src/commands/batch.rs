// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch commands

use super::format_time;
use anyhow::Result;
use clap::{Args, Subcommand};
use netq_store::Database;

#[derive(Args)]
pub struct BatchArgs {
    #[command(subcommand)]
    command: BatchCommand,
}

#[derive(Subcommand)]
enum BatchCommand {
    /// Create a batch to group tasks under
    Add { description: String },
    /// List recent batches with their tasks
    List {
        /// Show batches added before this batch id
        #[arg(long)]
        before: Option<i64>,
    },
    /// Show one batch
    Show { id: i64 },
}

pub fn run(db: &Database, args: BatchArgs) -> Result<()> {
    match args.command {
        BatchCommand::Add { description } => {
            let id = db.add_batch_task(&description)?;
            println!("added batch {}", id);
        }

        BatchCommand::List { before } => {
            let (batches, more) = db.get_batch_tasks(before)?;
            for batch in &batches {
                print_batch(batch);
            }
            if more {
                if let Some(last) = batches.last() {
                    println!("(more; rerun with --before {})", last.id);
                }
            }
        }

        BatchCommand::Show { id } => {
            let batch = db.get_batch_task(id)?;
            print_batch(&batch);
        }
    }
    Ok(())
}

fn print_batch(batch: &netq_store::BatchRecord) {
    println!(
        "batch {}  {}  {}",
        batch.id,
        format_time(batch.added_at),
        batch.description
    );
    for task in &batch.tasks {
        println!("  {:>6}  {:<12} {}", task.id.0, task.status.to_string(), task.description);
    }
}
