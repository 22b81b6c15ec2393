//! # Live Query Server
//!
//! Runs one replica's share of the live query store's background work and
//! exposes diagnostics over the shared store.
//!
//! Device check-ins and operator requests reach the store through the
//! library API; this binary owns the cleanup reconciler that evicts
//! campaigns the system of record abandoned.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use livequery_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use livequery_model::HostId;
use livequery_server::infra::{
    app_context::AppContext,
    diagnostics::{self, StatusReport},
    telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "livequery-server")]
#[command(about = "Live query distribution store replica")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to a livequery.toml configuration file
    #[arg(long, global = true, env = "LIVEQUERY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect the store and run the cleanup reconciler until Ctrl-C
    Run,
    /// Run a single cleanup pass and print its report
    ReconcileOnce {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List active campaigns with their target and pending counts
    Status {
        /// Only show this campaign
        #[arg(long)]
        name: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the queries a host would receive on its next check-in
    Lookup {
        #[arg(long)]
        host: u64,
        /// Print the queries as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = bootstrap(&cli.global)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(AppContext::connect(config).await?).await,
        Command::ReconcileOnce { json } => {
            reconcile_once(AppContext::connect(config).await?, json).await
        }
        Command::Status { name, json } => {
            let context = AppContext::connect_store_only(config).await?;
            let report =
                diagnostics::collect_status(context.store().as_ref(), name.as_deref())
                    .await?;
            print_status(&report, json)
        }
        Command::Lookup { host, json } => {
            let context = AppContext::connect_store_only(config).await?;
            let host = HostId(host);
            let queries =
                diagnostics::pending_for_host(context.store().as_ref(), host).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&queries)?);
            } else {
                print!("{}", diagnostics::render_pending(host, &queries));
            }
            Ok(())
        }
    }
}

/// Load configuration and start logging.
fn bootstrap(args: &GlobalArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config.clone(),
            env_file: args.env_file.clone(),
        })
        .load()
        .context("failed to load configuration")?;

    telemetry::init_tracing();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file in use");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        store.backend = %config.store.backend,
        store.inactive_retention = ?config.store.inactive_retention,
        reconciler.enabled = config.reconciler.enabled,
        reconciler.interval = ?config.reconciler.interval,
        "live query configuration in effect"
    );

    Ok(config)
}

async fn run(context: AppContext) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let Some(reconciler) = context.reconciler() else {
        warn!("reconciler disabled; waiting for shutdown signal");
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("Received shutdown signal");
        return Ok(());
    };

    let mut worker = tokio::spawn({
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
            cancel.cancel();
            if let Err(err) = (&mut worker).await {
                error!(error = %err, "reconciler task failed during shutdown");
            }
        }
        result = &mut worker => {
            if let Err(err) = result {
                error!(error = %err, "reconciler task error");
                return Err(err).context("reconciler task stopped unexpectedly");
            }
        }
    }

    info!("live query server shutting down");
    Ok(())
}

async fn reconcile_once(context: AppContext, json: bool) -> anyhow::Result<()> {
    let reconciler = context
        .reconciler()
        .context("reconciler is disabled in configuration")?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = reconciler.run_pass(&cancel).await;
    ctrl_c.abort();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "examined {} retained {} skipped (too recent) {} evicted {}",
            report.examined,
            report.retained,
            report.skipped_recent,
            report.evicted.len()
        );
        for name in &report.evicted {
            println!("  evicted {name}");
        }
    }
    Ok(())
}

fn print_status(report: &StatusReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", diagnostics::render_status(report));
    }
    Ok(())
}
