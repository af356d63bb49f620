use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use webresearch_api::config::ApiConfig;
use webresearch_api::routes::build_router;
use webresearch_api::state::AppState;
use webresearch_core::{TelemetryOptions, init_metrics_from_env, init_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env()?;
    let mut telemetry = TelemetryOptions::with_level(config.research.logging.level.clone());
    telemetry.with_target = true;
    init_telemetry(telemetry)?;
    init_metrics_from_env("webresearch-api");

    let state = AppState::try_from_config(&config)?;
    let app: Router = build_router(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(
        address = %config.listen_addr,
        max_concurrency = config.max_concurrency,
        "webresearch-api listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
