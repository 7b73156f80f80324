mod config;
mod logger;
mod relay;

use std::sync::Arc;

use config::ProxyConfig;
use mc_tap_injector::ProtocolManager;
use mc_tap_proto::{MessageTypeRegistry, RegistryTable};
use mc_tap_transport::ChannelInitializer;
use tokio::net::TcpListener;
use tracing::{error, info};

fn load_registry(config: &ProxyConfig) -> Result<Option<MessageTypeRegistry>, Box<dyn std::error::Error>> {
    let Some(path) = &config.registry.table else {
        return Ok(None);
    };
    let json = std::fs::read_to_string(path)?;
    let registry = MessageTypeRegistry::builder()
        .load_table(RegistryTable::from_json(&json)?)?
        .build();
    info!("Loaded wire table {path} ({} message types)", registry.len());
    Ok(Some(registry))
}

#[tokio::main]
async fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| "mc-tap.toml".into());
    let config = match ProxyConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        "mc-tap proxy v{} listening on {}, upstream {}",
        env!("CARGO_PKG_VERSION"),
        config.proxy.listen,
        config.proxy.upstream
    );

    let mut builder = ProtocolManager::builder()
        .layout(config.proxy.layout)
        .config(config.dispatch.clone());
    match load_registry(&config) {
        Ok(Some(registry)) => builder = builder.registry(registry),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to load wire table: {e}");
            std::process::exit(1);
        }
    }
    let manager = match builder.start() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("Failed to start protocol manager: {e}");
            std::process::exit(1);
        }
    };

    if config.logging.log_packets {
        if let Err(e) = manager.register(logger::entry()) {
            error!("Failed to register packet logger: {e}");
        }
    }

    let listener = match TcpListener::bind(&config.proxy.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {e}", config.proxy.listen);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        let _ = shutdown_tx.send(true);
    });

    relay::serve(
        listener,
        config.proxy.upstream.clone(),
        Arc::clone(&manager),
        ChannelInitializer::new(config.proxy.layout),
        shutdown_rx,
    )
    .await;

    manager.shutdown().await;
    info!("Proxy stopped");
}
