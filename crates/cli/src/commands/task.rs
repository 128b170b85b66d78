// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task commands

use super::format_time;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use netq_core::{TaskId, TaskPayload};
use netq_store::{Database, NewTask};
use std::path::PathBuf;

#[derive(Args)]
pub struct TaskArgs {
    #[command(subcommand)]
    command: TaskCommand,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Enqueue a task
    Add {
        /// Human-readable description
        description: String,
        /// Payload as JSON, inline
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,
        /// Payload as JSON, from a file
        #[arg(long)]
        payload_file: Option<PathBuf>,
        /// Task id this task depends on
        #[arg(long)]
        depends_on: Option<i64>,
        /// Batch to group this task under
        #[arg(long)]
        batch: Option<i64>,
    },
    /// List recent tasks
    List {
        /// Show tasks added before this task id
        #[arg(long)]
        before: Option<i64>,
    },
    /// Show one task
    Show { id: i64 },
    /// Print a task's log
    Log { id: i64 },
    /// Cancel queued tasks (reserved tasks are left alone)
    Cancel {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

pub fn run(db: &Database, args: TaskArgs) -> Result<()> {
    match args.command {
        TaskCommand::Add {
            description,
            payload,
            payload_file,
            depends_on,
            batch,
        } => {
            let payload = read_payload(payload, payload_file)?;
            let mut new = NewTask::new(description, payload);
            if let Some(id) = depends_on {
                new = new.depends_on(TaskId(id));
            }
            if let Some(batch_id) = batch {
                new = new.in_batch(batch_id);
            }
            let record = db.add_task(new)?;
            println!("added task {}", record.id);
        }

        TaskCommand::List { before } => {
            let (tasks, more) = db.get_tasks(before.map(TaskId))?;
            for task in &tasks {
                println!(
                    "{:>6}  {:<12} {}  {}",
                    task.id.0,
                    task.status.to_string(),
                    format_time(task.added_at),
                    task.description,
                );
            }
            if more {
                if let Some(last) = tasks.last() {
                    println!("(more; rerun with --before {})", last.id);
                }
            }
        }

        TaskCommand::Show { id } => {
            let task = db.get_task(TaskId(id))?;
            println!("task {}: {}", task.id, task.description);
            println!("  status:   {}", task.status);
            println!("  added:    {}", format_time(task.added_at));
            if let Some(depends_on) = task.depends_on {
                println!("  depends:  task {}", depends_on);
            }
            if let Some(batch_id) = task.batch_id {
                println!("  batch:    {}", batch_id);
            }
            println!("  payload:  {}", serde_json::to_string(&task.payload)?);
        }

        TaskCommand::Log { id } => {
            for entry in db.log_entries(TaskId(id))? {
                println!("{}  {}", format_time(entry.time), entry.message);
            }
        }

        TaskCommand::Cancel { ids } => {
            let ids: Vec<TaskId> = ids.into_iter().map(TaskId).collect();
            db.cancel_tasks(&ids)?;
            for id in &ids {
                let task = db.get_task(*id)?;
                println!("task {}: {}", id, task.status);
            }
        }
    }
    Ok(())
}

fn read_payload(inline: Option<String>, file: Option<PathBuf>) -> Result<TaskPayload> {
    let json = match (inline, file) {
        (Some(json), None) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("error reading {}", path.display()))?,
        _ => anyhow::bail!("exactly one of --payload and --payload-file is required"),
    };
    serde_json::from_str(&json).context("error parsing task payload")
}
