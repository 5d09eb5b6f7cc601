use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_relay::config::{ConfigStore, RelayConfig};
use camera_relay::events::EventBus;
use camera_relay::pipeline::{PipelineGateway, PipelineSink, UnavailableGateway, WsPipelineGateway};
use camera_relay::signaling::{DeliveryChannel, SessionRegistry, SignalingRelay};
use camera_relay::state::AppState;
use camera_relay::utils::bind_tcp_listener;
use camera_relay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camera-relay command line arguments
#[derive(Parser, Debug)]
#[command(name = "camera-relay")]
#[command(version, about = "Camera-scoped WebRTC signaling relay", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing; in-memory if unset)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Media pipeline WebSocket URL (overrides config)
    #[arg(long, value_name = "URL")]
    pipeline_url: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting camera-relay v{}", env!("CARGO_PKG_VERSION"));

    let config_store = match &args.config {
        Some(path) => {
            let store = ConfigStore::open(path).await?;
            tracing::info!("Using configuration file {}", store.path().display());
            store
        }
        None => ConfigStore::ephemeral(RelayConfig::default()),
    };

    // CLI overrides apply to this run only
    let mut config = (*config_store.get()).clone();
    if let Some(address) = &args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if let Some(url) = &args.pipeline_url {
        config.pipeline.url = Some(url.clone());
    }
    config_store.override_with(config.clone());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let cancel = CancellationToken::new();
    let events = Arc::new(EventBus::new());

    let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));
    let sink = PipelineSink::new(DeliveryChannel::new(registry.clone()));

    let (gateway, gateway_task) = match &config.pipeline.url {
        Some(url) => {
            let (gateway, task) = WsPipelineGateway::spawn(
                url.clone(),
                &config.pipeline,
                sink,
                events.clone(),
                cancel.clone(),
            );
            let gateway: Arc<dyn PipelineGateway> = gateway;
            (gateway, Some(task))
        }
        None => {
            tracing::warn!("No pipeline URL configured; offers will be refused");
            let gateway: Arc<dyn PipelineGateway> = Arc::new(UnavailableGateway::new(sink));
            (gateway, None)
        }
    };
    tracing::info!("Pipeline gateway: {}", gateway.name());

    let relay = SignalingRelay::new(
        registry,
        gateway,
        events.clone(),
        config.session.outbound_queue_capacity,
        Duration::from_secs(config.session.offer_timeout_secs.max(1)),
    );
    let sweeper = relay.spawn_idle_sweeper(config_store.clone(), cancel.clone());

    let state = AppState::new(
        config_store.clone(),
        relay.clone(),
        events,
        shutdown_tx.clone(),
    );
    let app = web::create_router(state);

    // Bind failure aborts startup
    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.port);
    let listener = bind_tcp_listener(addr)
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {}
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        }
    }

    // Stop accepting, then drain sessions before the gateway goes away
    let _ = shutdown_tx.send(());
    let grace = Duration::from_secs(config.session.shutdown_grace_secs);
    relay.shutdown(grace).await;

    cancel.cancel();
    let _ = sweeper.await;
    if let Some(task) = gateway_task {
        let _ = task.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camera_relay=error,tower_http=error",
        LogLevel::Warn => "camera_relay=warn,tower_http=warn",
        LogLevel::Info => "camera_relay=info,tower_http=info",
        LogLevel::Verbose => "camera_relay=debug,tower_http=info",
        LogLevel::Debug => "camera_relay=debug,tower_http=debug",
        LogLevel::Trace => "camera_relay=trace,tower_http=debug",
    };

    // RUST_LOG takes priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
