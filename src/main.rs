use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tado_bridge::config::BridgeConfig;
use tado_bridge::services::influx::InfluxWriter;
use tado_bridge::services::poller::Poller;
use tado_bridge::services::tado::TadoClient;
use tado_bridge::services::token_store::TokenStore;
use tado_bridge::state::AppState;
use tado_bridge::{routes, static_assets};
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tado_bridge=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = BridgeConfig::from_env()?;
    init_tracing()?;

    let http = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let tado = Arc::new(TadoClient::new(
        http.clone(),
        config.client_id.clone(),
        TokenStore::new(config.token_file.clone()),
    ));
    let influx = Arc::new(InfluxWriter::new(
        http,
        config.influx.clone(),
        config.dry_run,
    ));
    let poller = Arc::new(Poller::new(
        tado.clone(),
        influx.clone(),
        config.intervals.clone(),
    ));

    if config.dry_run {
        tracing::warn!("dry run mode enabled, no data will be written to InfluxDB");
    }

    let cancel = CancellationToken::new();
    poller.clone().start(cancel.clone());

    let state = AppState {
        config: config.clone(),
        tado,
        influx,
        poller,
    };
    let app = routes::router(state)
        .fallback_service(static_assets::service(config.static_root.clone())?);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind listener on port {}", config.port))?;
    tracing::info!(port = config.port, "tado-bridge HTTP listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {}
    }
    cancel.cancel();

    Ok(())
}
