//! A StatsD/DogStatsD ingestion bridge.
//!
//! Listens for metric lines over TCP and UDP, normalizes them into canonical events, runs them through a configurable
//! mapping/filter stage, and forwards batches to a downstream metrics backend.

#![deny(warnings)]
#![deny(missing_docs)]

use std::sync::Arc;

use sluice_config::ConfigurationLoader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod config;
use self::config::{AppConfig, BackendConfig};

mod forward;
use self::forward::{Blackhole, HttpSender, MetricsSender};

mod listener;
use self::listener::Dispatcher;

mod mapper;
use self::mapper::{MetricMapper, RuleMappingProcessor};

mod telemetry;
use self::telemetry::Telemetry;

pub(crate) type GenericError = anyhow::Error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run().await {
        Ok(()) => info!("sluice stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), GenericError> {
    info!("sluice starting...");

    // We only accept a single, optional command line argument: the path to the configuration file. Everything in it
    // can also be supplied (or overridden) through `SLUICE_`-prefixed environment variables.
    let loader = ConfigurationLoader::default();
    let loader = match std::env::args().nth(1) {
        Some(path) => loader.from_yaml(path)?,
        None => loader,
    };
    let config: AppConfig = loader.from_environment("SLUICE")?.into_generic().as_typed()?;
    config.validate()?;

    let sender = build_sender(&config.backend)?;
    let shutdown = CancellationToken::new();

    let (telemetry, flusher) = if config.self_metrics {
        let (telemetry, receiver) = Telemetry::with_capacity(telemetry::DEFAULT_QUEUE_CAPACITY);
        let flusher = telemetry::spawn_flusher(receiver, Arc::clone(&sender), shutdown.child_token());
        (Some(telemetry), Some(flusher))
    } else {
        (None, None)
    };

    let processor = RuleMappingProcessor::from_config(&config.processable_prefixes, &config.mappings)?;
    let mapper = Arc::new(MetricMapper::new(
        Box::new(processor),
        telemetry,
        config.coarse_batch_faults,
    ));
    let dispatcher = Dispatcher::new(mapper, Arc::clone(&sender), config.environment.as_deref());

    let mut listeners = Vec::new();

    if let Some(tcp_config) = config.tcp {
        let tcp_listener = listener::tcp::bind(&tcp_config).await?;
        listeners.push(tokio::spawn(listener::tcp::run(
            tcp_listener,
            tcp_config,
            dispatcher.clone(),
            shutdown.child_token(),
        )));
    }

    if let Some(udp_config) = config.udp {
        let udp_socket = listener::udp::bind(&udp_config).await?;
        listeners.push(tokio::spawn(listener::udp::run(
            udp_socket,
            udp_config,
            dispatcher.clone(),
            shutdown.child_token(),
        )));
    }

    info!("sluice started.");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for shutdown signal: {}", e))?;
    info!("Received shutdown signal. Stopping...");

    shutdown.cancel();
    for task in listeners {
        let _ = task.await;
    }
    if let Some(flusher) = flusher {
        let _ = flusher.await;
    }

    Ok(())
}

fn build_sender(config: &BackendConfig) -> Result<Arc<dyn MetricsSender>, GenericError> {
    match config {
        BackendConfig::Http(http_config) => Ok(Arc::new(HttpSender::from_config(http_config)?)),
        BackendConfig::Blackhole => Ok(Arc::new(Blackhole::default())),
    }
}
