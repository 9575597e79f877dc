use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aog::{
    config::Config,
    database::{Database, repositories::Repositories},
    downloads::AcquisitionEngine,
    engine::{EngineManager, EngineState},
    flavor::SharedFlavorRegistry,
    plugins::PluginManager,
    providers::{HealthProber, ProviderRegistry, TransportFactory},
    scheduler::HybridScheduler,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "aog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local AI gateway multiplexing inference requests across providers")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "aog.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.server.log_level = level;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aog={}", config.server.log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting AOG gateway v{}", env!("CARGO_PKG_VERSION"));
    config.ensure_layout().await?;

    let database = Database::new(&config.database_url()).await?;
    database.migrate().await?;
    info!("database ready at {}", config.database_url());

    let repos = Repositories::new(database.connection());
    let flavors = SharedFlavorRegistry::load_embedded()?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()?;

    let engines = Arc::new(EngineManager::new(config.clone(), client.clone()));
    let registry = ProviderRegistry::new(repos.providers.clone());
    registry.hydrate().await?;

    let transports = TransportFactory::new(client.clone(), engines.clone());
    let downloads = AcquisitionEngine::new(
        &config,
        client.clone(),
        repos.models.clone(),
        engines.clone(),
    );
    let scheduler = HybridScheduler::new(
        repos.clone(),
        registry.clone(),
        flavors.clone(),
        transports.clone(),
        config.scheduler.remote_payload_threshold,
    );
    let plugins = PluginManager::new(config.plugins_dir());

    let shutdown = CancellationToken::new();

    // Installed engines come back up before traffic arrives; missing ones
    // stay absent until /service/install. A version below the required
    // minimum triggers an upgrade once the engine is running.
    for flavor in engines.flavors() {
        let engines = engines.clone();
        let engine_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let Ok(supervisor) = engines.supervisor(&flavor) else {
                return;
            };
            if let Err(error) = supervisor.start("daemon").await {
                warn!(flavor = %flavor, %error, "engine autostart failed");
                return;
            }
            if matches!(supervisor.state(), EngineState::Running)
                && let Err(error) = supervisor.upgrade(&engine_shutdown).await
            {
                warn!(flavor = %flavor, %error, "engine upgrade failed");
            }
        });
    }

    let state = AppState {
        config: config.clone(),
        repos,
        registry: registry.clone(),
        flavors,
        scheduler,
        engines: engines.clone(),
        downloads: downloads.clone(),
        plugins,
        client: client.clone(),
    };

    let server = WebServer::new(state)?;
    info!("starting web server on {}", server.addr());

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server_shutdown = shutdown.clone();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve_with_signal(ready_tx, server_shutdown).await {
            error!("web server failed: {e}");
        }
    });

    match ready_rx.await {
        Ok(Ok(())) => info!("web server is listening; starting background services"),
        Ok(Err(bind_error)) => return Err(bind_error),
        Err(_) => anyhow::bail!("web server task exited without signaling"),
    }

    // Background services start only after the server is reachable.
    let prober = HealthProber::new(registry, transports);
    prober.spawn(shutdown.clone());
    info!("all services started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = &mut server_handle => {
            anyhow::bail!("web server exited unexpectedly");
        }
    }

    shutdown.cancel();
    downloads.cancel_all().await;
    engines.stop_all().await;
    info!("gateway stopped");
    Ok(())
}
