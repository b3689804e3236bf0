use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::{info, warn};

use bank_transaction_gateway::api::create_router;
use bank_transaction_gateway::app::{AppState, GatewayConfig, GatewayService};
use bank_transaction_gateway::domain::AuditSink;
use bank_transaction_gateway::infra::{
    HttpBankTransport, HttpTransportConfig, LogFormat, PostgresAuditSink, TracingAuditSink,
    init_metrics, init_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing(LogFormat::from_env());

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    info!(
        core_url = %config.internal.base_url,
        banks = config.banks.len(),
        rate_limit = config.rate_limit.requests_per_window,
        "Configuration loaded"
    );

    let audit: Arc<dyn AuditSink> = match &config.database_url {
        Some(url) => {
            let sink = PostgresAuditSink::with_defaults(url)
                .await
                .context("failed to connect audit database")?;
            sink.run_migrations()
                .await
                .context("failed to run migrations")?;
            Arc::new(sink)
        }
        None => {
            warn!("DATABASE_URL not set; audit events go to the log only");
            Arc::new(TracingAuditSink::new())
        }
    };

    let transport = Arc::new(HttpBankTransport::new(HttpTransportConfig::covering(
        config.max_call_timeout(),
    ))?);
    let service = GatewayService::from_config(&config, transport, audit)?;

    let mut state = AppState::new(
        Arc::new(service),
        &config.rate_limit,
        config.secret_key.clone(),
    );
    match init_metrics() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!(error = %e, "Metrics recorder not installed"),
    }

    let router = create_router(Arc::new(state));
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(addr = %addr, "Bank transaction gateway listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
