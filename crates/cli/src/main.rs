// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! netq - operator CLI for the task queue

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{batch, lock, queue, task};
use netq_store::{Database, WorkerIdentity};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netq", version, about = "Network resource task queue")]
struct Cli {
    /// Path to the shared database (defaults to $NETQ_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Worker name presented to the admission gate (defaults to hostname)
    #[arg(long, global = true)]
    worker_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task management
    Task(task::TaskArgs),
    /// Batch management
    Batch(batch::BatchArgs),
    /// Queue control and statistics
    Queue(queue::QueueArgs),
    /// Lock inspection and manual recovery
    Lock(lock::LockArgs),
    /// Apply pending schema migrations and exit
    Migrate,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = open_database(&cli)?;

    match cli.command {
        Commands::Task(args) => task::run(&db, args),
        Commands::Batch(args) => batch::run(&db, args),
        Commands::Queue(args) => queue::run(&db, args),
        Commands::Lock(args) => lock::run(&db, args),
        // Migrations are applied on open.
        Commands::Migrate => {
            println!("database is up to date");
            Ok(())
        }
    }
}

fn open_database(cli: &Cli) -> Result<Database> {
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => std::env::var_os("NETQ_DB")
            .map(PathBuf::from)
            .context("no database given: pass --db or set NETQ_DB")?,
    };
    let worker_name = match &cli.worker_name {
        Some(name) => name.clone(),
        None => hostname::get()
            .context("error reading hostname for worker name")?
            .to_string_lossy()
            .into_owned(),
    };
    let db = Database::open(&path, WorkerIdentity::new(worker_name))
        .with_context(|| format!("error opening database {}", path.display()))?;
    Ok(db)
}
