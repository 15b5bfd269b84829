use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udpchat_backend::{
    api::AppState,
    bridge::start_bridge,
    clocksync,
    config::Config,
    create_router,
    fanout::Fanout,
    registry::{spawn_sweeper, MemberRegistry},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting udpchat registry");

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        "Configuration loaded: ttl={:?} sweep={:?}",
        config.client_timeout(),
        config.client_check_interval()
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    // Build application state
    let registry = MemberRegistry::new(config.client_timeout()).shared();
    let fanout = Fanout::bind("0.0.0.0:0").await?;
    let state = AppState::new(registry.clone(), config.clone())
        .with_fanout(fanout)
        .with_metrics(metrics);

    // Clock service
    let ntp_listener = tokio::net::TcpListener::bind(config.ntp_addr()).await?;
    tokio::spawn(clocksync::serve(ntp_listener));

    // UDP bridge listener, registered as a permanent member
    start_bridge(&state).await?;

    // Eviction sweep
    spawn_sweeper(registry, config.client_check_interval());

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
