//! # leadsync
//!
//! Moves triggered CRM contacts into outreach campaigns exactly once.
//!
//! - `leadsync run`: one batch, summary printed as JSON
//! - `leadsync serve`: batches on an interval plus `/health`, `/status`
//!   and `POST /runs`
//! - `leadsync stats`: ledger totals
//! - `leadsync check-config`: load, validate and print warnings

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use leadsync_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use leadsync_core::ledger::LedgerStore;
use leadsync_server::{
    AppState,
    app::{build_pipeline, open_ledger},
    routes, scheduler,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "leadsync", version)]
#[command(about = "Sync triggered CRM contacts into outreach campaigns exactly once")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to leadsync.toml
    #[arg(long, short = 'c', global = true, env = "LEADSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one batch and print its summary
    Run,
    /// Run batches on an interval and expose the status API
    Serve(ServeArgs),
    /// Print ledger totals
    Stats,
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Pause between batches, e.g. "5m" (overrides config)
    #[arg(long, value_parser = parse_interval)]
    interval: Option<Duration>,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(raw).map_err(|err| err.to_string())?;
    if interval.is_zero() {
        return Err("interval must be non-zero".to_string());
    }
    Ok(interval)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,leadsync=info,tower_http=warn".into()),
        )
        // stdout carries command output
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.global)?;

    match cli.command {
        Command::Run => run_once(config).await,
        Command::Serve(args) => serve(config, args).await,
        Command::Stats => print_stats(config).await,
        Command::CheckConfig => check_config(&config),
    }
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config.clone(),
            env_file: args.env_file.clone(),
        })
        .load()
        .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }
    warnings.log();

    Ok(config)
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next safe point");
            token.cancel();
        }
    });
}

async fn run_once(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let pipeline = build_pipeline(&config, cancel).await?;
    let outcome = pipeline.run().await.context("sync run failed")?;
    print_json(&outcome)
}

async fn serve(mut config: Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(interval) = args.interval {
        config.server.interval = interval;
    }

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let pipeline = Arc::new(build_pipeline(&config, shutdown.clone()).await?);
    let state = AppState::new(pipeline);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "status API listening");

    let scheduler = tokio::spawn(scheduler::run_scheduler(
        state.clone(),
        config.server.interval,
        shutdown.clone(),
    ));

    let router = routes::create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("status API failed")?;

    shutdown.cancel();
    scheduler.await.context("scheduler task panicked")?;
    Ok(())
}

async fn print_stats(config: Config) -> anyhow::Result<()> {
    let ledger = open_ledger(&config).await?;
    let stats = ledger.stats().await.context("failed to read ledger stats")?;
    print_json(&stats)
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let pipeline = config.pipeline_config();
    pipeline
        .validate()
        .context("pipeline configuration rejected")?;

    println!("configuration OK");
    println!(
        "  trigger: {} = {}",
        pipeline.trigger.field, pipeline.trigger.value
    );
    println!("  owners mapped: {}", pipeline.owners.len());
    println!("  exclusion rules: {}", pipeline.exclusions.len());
    println!(
        "  enrichment: {}",
        if pipeline.enrichment.is_some() { "on" } else { "off" }
    );
    println!(
        "  ledger: {}",
        if config.database.is_sqlite() { "sqlite" } else { "postgres" }
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
