use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Reconcile a local employee table with a REST identity directory",
    long_about = None
)]
pub struct Cli {
    /// YAML configuration file (defaults to ./directory-sync.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile every pending employee record with the directory
    Sync(SyncArgs),
    /// Reconcile a single record by primary key, whatever its sync state
    SyncOne(SyncOneArgs),
    /// Look up an email in the directory without touching the database
    Status(StatusArgs),
    /// Check database connectivity and reach the directory
    Check,
    /// Show the column mapping against the live table
    Columns,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SyncOneArgs {
    /// Primary key of the employee row
    #[arg(long)]
    pub id: i64,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Email address to look up
    #[arg(short, long)]
    pub email: String,
}
