mod alarm;
mod api;
mod config;
mod db;
mod display;
mod latest;
mod store;

use std::time::Duration;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::alarm::{AlarmStatusView, EvaluatorService};
use crate::api::AppState;
use crate::config::Config;
use crate::latest::LatestReadings;
use crate::store::{PgMeasurementStore, PgNotificationSink, PgRuleStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    // Shared views the evaluation loop refreshes and the API reads.
    let latest = LatestReadings::new();
    let alarms = AlarmStatusView::new();

    // Spawn the periodic alarm evaluation loop.
    {
        let service = EvaluatorService::new(
            PgRuleStore::new(pool.clone()),
            PgMeasurementStore::new(pool.clone()),
            PgNotificationSink::new(pool.clone()),
            config.account_ids.clone(),
            Duration::from_secs(config.eval_interval_secs),
            Duration::from_secs(config.measurement_period_secs),
            latest.clone(),
            alarms.clone(),
        );
        tokio::spawn(service.run());
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    let state = AppState {
        rules: PgRuleStore::new(pool.clone()),
        pool,
        latest,
        alarms,
    };
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
