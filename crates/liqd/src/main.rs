//! liqd: the liquidation bot manager daemon.
//!
//! Assembles the manager from its backends and runs it until a signal
//! arrives or the dispatch loop fails:
//!
//! ```text
//! env ──▶ Cli ──┬─ RedisQueue / RedisCache
//!               ├─ Docker or ECS deployer per role ──▶ QueueWatermark scalers
//!               ├─ LcdStorage
//!               ├─ DatadogSink (when DD_API_KEY is set)
//!               └─▶ Manager::run_until(SIGINT / SIGTERM) ──▶ Manager::stop
//! ```
//!
//! Exits with status 1 on invalid configuration or a fatal manager error.

mod config;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use liquidator_autoscale::{QueueWatermark, Scaler};
use liquidator_chain::LcdStorage;
use liquidator_core::WorkerRole;
use liquidator_deployer::{Deployer, DockerCli, DockerDeployer, EcsDeployer};
use liquidator_dispatch::{Manager, ScalerMap};
use liquidator_metrics::DatadogSink;
use liquidator_store::{Queue, RedisCache, RedisQueue, redis_url};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, DeployerType, LogFormat, QUEUE_POP_TIMEOUT, ScalingType};

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    init_tracing(&cli);

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "manager exited with error");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match cli.log_format {
        LogFormat::Json => builder.json().with_current_span(false).init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.manager_config();
    info!(
        service = %cli.service_name,
        chain_id = %config.chain_id,
        contract = %config.contract_address,
        work_item_type = %config.work_item_type,
        "liquidation manager starting"
    );

    // ── Backends ───────────────────────────────────────────────

    let queue: Arc<dyn Queue> = Arc::new(
        RedisQueue::new(
            &redis_url(&cli.redis_endpoint, cli.redis_database),
            QUEUE_POP_TIMEOUT,
        )
        .context("invalid queue endpoint")?,
    );
    let cache = Arc::new(
        RedisCache::new(&redis_url(&cli.redis_endpoint, cli.redis_metrics_database))
            .context("invalid cache endpoint")?,
    );
    let storage = Arc::new(LcdStorage::new(&cli.lcd_endpoint).context("invalid LCD endpoint")?);

    // ── Scalers ────────────────────────────────────────────────

    let mut scalers: ScalerMap = BTreeMap::new();
    for role in WorkerRole::ALL {
        let deployer = build_deployer(&cli, role).await?;
        let scaler: Arc<dyn Scaler> = match cli.scaling_type {
            ScalingType::Watermark => Arc::new(
                QueueWatermark::new(
                    queue.clone(),
                    cli.queue_name(role),
                    deployer,
                    cli.watermarks(role),
                )
                .with_context(|| format!("invalid {role} scaler"))?,
            ),
        };
        info!(role = %role, queue = cli.queue_name(role), "scaler configured");
        scalers.insert(role.as_str().to_string(), scaler);
    }

    // ── Manager ────────────────────────────────────────────────

    let mut manager = Manager::new(config, queue, cache, storage, scalers)?;
    if cli.metrics_enabled {
        match &cli.dd_api_key {
            Some(key) => {
                let sink = DatadogSink::new(key.clone(), &cli.dd_site)
                    .context("invalid metrics sink")?;
                manager = manager.with_metrics_sink(Arc::new(sink));
                info!(site = %cli.dd_site, "reporting metrics to Datadog");
            }
            None => warn!("metrics enabled without DD_API_KEY, writing them to the log"),
        }
    }

    // Returns once the loop has ended and, after a signal, every role has
    // been scaled to zero.
    manager.run_until(wait_for_signal()).await?;

    info!("liquidation manager stopped");
    Ok(())
}

async fn build_deployer(cli: &Cli, role: WorkerRole) -> anyhow::Result<Arc<dyn Deployer>> {
    let env = cli.role_env(role)?;
    let image = cli.image(role);

    let deployer: Arc<dyn Deployer> = match cli.deployer_type {
        DeployerType::Docker => Arc::new(DockerDeployer::new(
            role.as_str(),
            image,
            env,
            &cli.docker_name_prefix,
            DockerCli::new(cli.docker_binary.clone(), cli.docker_network.clone()),
        )?),
        DeployerType::AwsEcs => {
            let ecs = cli.ecs_config()?;
            Arc::new(
                EcsDeployer::connect(role.as_str(), image, &env, &ecs)
                    .await
                    .with_context(|| format!("unable to provision {role} service"))?,
            )
        }
    };
    Ok(deployer)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "unable to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "unable to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
