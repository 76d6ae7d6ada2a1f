use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use ups_aggregator::config::Config;
use ups_aggregator::poller::Poller;
use ups_aggregator::powerpanel::{PowerPanelClient, SessionManager};
use ups_aggregator::store::ClickHouseStore;
use ups_aggregator::telemetry;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error=%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error=%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("unable to build configuration")?;
    telemetry::init_tracing(config.otlp_endpoint.as_deref())?;

    let store = ClickHouseStore::connect(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
        &config.clickhouse_table,
    )
    .await?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let client = PowerPanelClient::new(
        http,
        &config.power_panel_url,
        config.power_panel_hashed_username.clone(),
        config.power_panel_hashed_password.clone(),
    );
    let session = SessionManager::connect(client.clone(), config.token_validity())
        .await
        .context("unable to authenticate with PowerPanel")?;

    let cancel = CancellationToken::new();
    let handle = Poller::new(client, Arc::new(session), store, config.poll_interval())
        .start(cancel.clone());

    shutdown_signal().await;
    tracing::info!("shutdown signal received; exiting ups aggregator");
    cancel.cancel();

    match handle.join().await {
        Ok(state) => tracing::info!(state = ?state, "aggregator stopped"),
        Err(err) => tracing::error!(error=%err, "aggregator task failed"),
    }
    telemetry::shutdown_tracing();

    Ok(())
}
