//! alertingd - alert rule evaluation daemon
//!
//! Schedules alert rules, tracks alert instances, routes notifications to
//! local and external Alertmanagers and serves the alerting HTTP API.

mod config;
mod executor;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alerting_api::{ApiServer, ApiState};
use alerting_core::{
    Evaluator, MemoryDatasourceCache, MemoryInstanceStore, MemoryRuleStore, RuleCountQuota,
    Scheduler, StateManager,
};
use alerting_notify::{AlertSender, NotificationRouter, RemoteAlertmanager};
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{AppConfig, SAMPLE_CONFIG};
use crate::executor::HttpQueryExecutor;

#[derive(Parser)]
#[command(name = "alertingd")]
#[command(about = "Alert rule evaluation daemon")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "ALERTINGD_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(short, long, env = "ALERTINGD_CONFIG", default_value = "/etc/alertingd/config.toml")]
        config: PathBuf,

        /// Override the listen address
        #[arg(long, env = "ALERTINGD_BIND")]
        bind: Option<SocketAddr>,
    },

    /// Validate a config file and print a summary
    CheckConfig {
        /// Path to config file
        #[arg(short, long, env = "ALERTINGD_CONFIG", default_value = "/etc/alertingd/config.toml")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/alertingd/config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("alertingd=info,alerting_core=info,alerting_notify=info,alerting_api=info")
    })?;
    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run { config, bind } => run_daemon(&config, bind).await?,
        Commands::CheckConfig { config } => check_config(&config)?,
        Commands::InitConfig { output, force } => init_config(&output, force)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn build_router(config: &AppConfig) -> anyhow::Result<Arc<NotificationRouter>> {
    let router = Arc::new(NotificationRouter::new(config.router_config()));
    let client = reqwest::Client::builder()
        .build()
        .context("building alertmanager client")?;

    for org in &config.notifications.orgs {
        let senders: Vec<Arc<dyn AlertSender>> = org
            .alertmanagers
            .iter()
            .map(|am| {
                let mut sender = RemoteAlertmanager::new(&am.name, &am.url, client.clone());
                if let Some(user) = &am.username {
                    sender = sender.with_basic_auth(user, am.password.clone().unwrap_or_default());
                }
                Arc::new(sender) as Arc<dyn AlertSender>
            })
            .collect();
        router.set_org_backends(org.org_id, org.choice, senders);
    }
    Ok(router)
}

async fn run_daemon(config_path: &Path, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting alertingd");

    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let rules = Arc::new(MemoryRuleStore::new());
    let executor = HttpQueryExecutor::new(&config.query.url, Duration::from_secs(config.query.timeout_secs))?;
    let state_manager = Arc::new(StateManager::with_config(
        Arc::new(MemoryInstanceStore::new()),
        config.state_config(),
    ));
    let router = build_router(&config)?;
    let scheduler = Scheduler::new(
        config.scheduler_config(),
        Evaluator::new(Arc::new(executor)),
        state_manager,
        router.clone(),
        rules.clone(),
    );

    let datasources = Arc::new(MemoryDatasourceCache::new());
    for ds in &config.datasources {
        info!(uid = %ds.uid, org_id = ds.org_id, ds_type = %ds.ds_type, "registering datasource");
        datasources.insert(ds.clone());
    }

    let mut state = ApiState::new(
        config.server_config(),
        scheduler.clone(),
        router.clone(),
        rules.clone(),
        datasources,
    )?;
    if let Some(limit) = config.quota.rules_per_org {
        state = state.with_quota(Arc::new(RuleCountQuota::new(rules, Some(limit))));
    }
    let server = ApiServer::new(state);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received shutdown signal"),
                Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
            }
            shutdown.cancel();
        });
    }

    let scheduler_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };
    let maintenance_task = {
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(config.notifications.maintenance_interval_secs.max(1));
        let router = router.clone();
        tokio::spawn(async move { router.run_maintenance(interval, shutdown).await })
    };

    let served = server
        .serve_with_shutdown(shutdown.clone().cancelled_owned())
        .await;
    shutdown.cancel();

    match scheduler_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "scheduler stopped with error"),
        Err(e) => error!(error = %e, "scheduler task panicked"),
    }
    if let Err(e) = maintenance_task.await {
        error!(error = %e, "maintenance task panicked");
    }

    served?;
    info!("alertingd stopped");
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    println!("Configuration OK: {}", config_path.display());
    println!("  Listen address:   {}", config.server.bind);
    println!("  Query service:    {}", config.query.url);
    println!("  Min interval:     {}s", config.scheduler.min_interval_secs);
    println!("  Datasources:      {}", config.datasources.len());
    for ds in &config.datasources {
        println!("    - {} ({}, org {})", ds.uid, ds.ds_type, ds.org_id);
    }
    println!("  Routed orgs:      {}", config.notifications.orgs.len());
    for org in &config.notifications.orgs {
        println!(
            "    - org {}: {} external alertmanager(s), choice {:?}",
            org.org_id,
            org.alertmanagers.len(),
            org.choice
        );
    }
    match config.quota.rules_per_org {
        Some(limit) => println!("  Rule quota:       {limit} per org"),
        None => println!("  Rule quota:       unlimited"),
    }
    Ok(())
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    std::fs::write(output, SAMPLE_CONFIG).with_context(|| format!("writing {}", output.display()))?;

    println!("Config written to {}", output.display());
    println!("Edit the file, then run: alertingd run --config {}", output.display());
    Ok(())
}
