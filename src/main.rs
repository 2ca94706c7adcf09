use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use roomledger::api::{self, AppState};
use roomledger::auth::{AllowAll, IdentityVerifier, JwtVerifier};
use roomledger::booking::BookingService;
use roomledger::catalog::CatalogService;
use roomledger::config::Config;
use roomledger::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roomledger::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(&config.data_dir.join("roomledger.wal"))?);

    let verifier: Arc<dyn IdentityVerifier> = if config.dev_mode {
        tracing::warn!("dev mode: identity verification is bypassed");
        Arc::new(AllowAll::new(config.admin_permission))
    } else {
        let pem = std::fs::read(&config.jwt_public_key_path)?;
        Arc::new(JwtVerifier::from_pem(
            &pem,
            &config.jwt_issuer,
            &config.jwt_audience,
        )?)
    };

    let state = AppState {
        booking: Arc::new(BookingService::new(store.clone(), &config)),
        catalog: Arc::new(CatalogService::new(store, &config)),
        verifier,
    };
    let app = api::build_router(state);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("roomledger listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  repeat_limit: {}", config.repeat_limit);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!(
                "http://0.0.0.0:{p}/metrics"
            ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("roomledger stopped");
    Ok(())
}
