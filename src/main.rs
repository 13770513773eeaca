use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use webrtc_relay::webrtc::WebRtcEngineFactory;
use webrtc_relay::{RelayConfig, RoomRegistry, Router, SignalingServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::parse();
    info!(
        listen = %config.listen,
        default_room = %config.default_room,
        stun = ?config.stun_servers,
        engine_timeout_ms = config.engine_timeout_ms,
        "Starting signaling relay"
    );

    let registry = Arc::new(RoomRegistry::new());
    let engines = Arc::new(WebRtcEngineFactory::new(config.stun_servers.clone()));
    let router = Router::from_config(registry.clone(), engines, &config);

    let server = SignalingServer::bind(&config, router)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!(rooms = registry.len(), "Shutdown signal received");
        }
    }

    info!("Signaling relay stopped");
    Ok(())
}
