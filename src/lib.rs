pub mod cli;
pub mod columns;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod report;
pub mod schema;
pub mod store;
pub mod values;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::{AppConfig, DEFAULT_CONFIG_FILE},
    directory::RestDirectoryClient,
    engine::{ReconciliationEngine, StatusReport},
    store::RecordStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(verbose: bool) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            let level = if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            builder.filter_module("directory_sync", level);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Sync(args) => handle_sync(&config, args.json),
        Commands::SyncOne(args) => handle_sync_one(&config, args.id),
        Commands::Status(args) => handle_status(&config, &args.email),
        Commands::Check => handle_check(&config),
        Commands::Columns => columns::execute(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    let config = AppConfig::load(path, explicit)
        .with_context(|| format!("Loading configuration from {path:?}"))?;
    debug!(
        "Database {:?}, directory {}, table '{}'",
        config.database.url, config.directory.base_url, config.mapping.table
    );
    Ok(config)
}

fn build_engine(config: &AppConfig) -> Result<ReconciliationEngine<RestDirectoryClient>> {
    let mapping = config.column_mapping().context("Resolving column mapping")?;
    let store = RecordStore::new(config.database.path()?, mapping);
    let directory = RestDirectoryClient::new(&config.directory)
        .context("Configuring the directory client")?;
    Ok(ReconciliationEngine::new(
        store,
        directory,
        config.sync.pacing(),
    ))
}

fn handle_sync(config: &AppConfig, json: bool) -> Result<()> {
    let engine = build_engine(config)?;
    info!(
        "Starting reconciliation of table '{}' in {:?}",
        engine.store().mapping().table(),
        engine.store().path()
    );
    let summary = match engine.run() {
        Ok(summary) => summary,
        Err(err) => bail!("aborted: {err}"),
    };
    if json {
        println!(
            "{}",
            report::render_summary_json(&summary).context("Serialising run summary")?
        );
    } else {
        print!("{}", report::render_summary(&summary));
    }
    Ok(())
}

fn handle_sync_one(config: &AppConfig, id: i64) -> Result<()> {
    let engine = build_engine(config)?;
    let outcome = engine
        .sync_one(id)
        .with_context(|| format!("Reconciling record {id}"))?;
    println!("{}", report::render_outcome(&outcome));
    if let Some(error) = outcome.error() {
        bail!("record {id} was not reconciled: {error}");
    }
    Ok(())
}

fn handle_status(config: &AppConfig, email: &str) -> Result<()> {
    let engine = build_engine(config)?;
    let status = engine.check_status(email);
    println!("{}", report::render_status(email.trim(), &status));
    if let StatusReport::LookupError(detail) = status {
        bail!("directory lookup failed: {detail}");
    }
    Ok(())
}

fn handle_check(config: &AppConfig) -> Result<()> {
    let engine = build_engine(config)?;
    let database_ok = engine.test_connectivity();
    println!(
        "database {:?}: {}",
        engine.store().path(),
        if database_ok { "ok" } else { "unreachable" }
    );
    let directory = engine.test_directory();
    match &directory {
        Ok(()) => println!("directory {}: ok", config.directory.base_url),
        Err(err) => println!("directory {}: {err}", config.directory.base_url),
    }
    if !database_ok {
        bail!("database connectivity check failed");
    }
    directory.context("Directory connectivity check failed")
}
