//! Crossflow Engine - request coordination and cross-chain execution
//!
//! The service behind the Crossflow trading dashboard: turns rate-limited
//! third-party quote/price APIs into a deduplicated cached data source and
//! drives swap/bridge executions to completion with retry and timeout
//! policy. The dashboard edge tier talks to it over HTTP.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod amount;
mod api;
mod config;
mod coordinator;
mod error;
mod executor;
mod metrics;
mod orders;
mod providers;
mod resolver;

use config::Settings;
use coordinator::RequestCoordinator;
use executor::SwapExecutor;
use metrics::MetricsServer;
use orders::{OrderStore, SqlOrderStore, TriggerEvaluator};
use providers::{
    BridgeProvider, HttpBridgeProvider, HttpSwapProvider, LocalSigner, RpcStatusProvider,
    StatusProvider, SwapProvider, WalletProvider,
};
use resolver::{CrossChainResolver, QuoteResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Crossflow Engine v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize database connection
    let store = Arc::new(SqlOrderStore::new(&settings.database).await?);
    info!("Database connection established");

    // Run migrations
    store.run_migrations().await?;
    info!("Database migrations complete");

    // Shared request coordinator: one deduplicating cache for everything
    let coordinator = RequestCoordinator::new(settings.coordinator.clone());

    // Provider collaborators
    let swap_provider: Arc<dyn SwapProvider> =
        Arc::new(HttpSwapProvider::new(&settings.providers)?);
    let bridge_provider: Arc<dyn BridgeProvider> =
        Arc::new(HttpBridgeProvider::new(&settings.providers)?);
    let wallet: Arc<dyn WalletProvider> = Arc::new(LocalSigner::from_settings(&settings)?);
    let status_provider: Arc<dyn StatusProvider> =
        Arc::new(RpcStatusProvider::from_settings(&settings)?);

    // Execution state machine
    let swap_executor = Arc::new(SwapExecutor::new(
        wallet,
        bridge_provider.clone(),
        status_provider,
        settings.executor.clone(),
    ));

    // Quote resolvers
    let quote_resolver = Arc::new(QuoteResolver::spawn(
        coordinator.clone(),
        swap_provider.clone(),
        settings.resolver.clone(),
    ));
    let cross_chain_resolver = Arc::new(CrossChainResolver::spawn(
        coordinator.clone(),
        bridge_provider,
        settings.resolver.clone(),
    ));

    // Order trigger evaluator
    let evaluator = Arc::new(TriggerEvaluator::new(
        store.clone() as Arc<dyn OrderStore>,
        swap_provider,
        coordinator.clone(),
        &settings.scheduler,
    ));

    // Initialize metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            executor: swap_executor.clone(),
            store: store.clone(),
            quote: quote_resolver.clone(),
            cross_chain: cross_chain_resolver.clone(),
            coordinator: coordinator.clone(),
        };
        let api_config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Scheduled order trigger evaluation
    let scheduler_handle = tokio::spawn({
        let evaluator = evaluator.clone();
        let interval = settings.scheduler.trigger_interval_secs;
        async move {
            let mut ticker =
                tokio::time::interval(tokio::time::Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                match evaluator.run_cycle().await {
                    Ok(summary) => {
                        if summary.triggered + summary.expired + summary.advanced > 0 {
                            info!(
                                "Trigger cycle: {} triggered, {} advanced, {} expired, {} skipped",
                                summary.triggered,
                                summary.advanced,
                                summary.expired,
                                summary.skipped
                            );
                        }
                    }
                    Err(e) => error!("Trigger cycle failed: {}", e),
                }
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let store = store.clone();
        let interval = settings.engine.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                match store.health_check().await {
                    Ok(()) => metrics::record_health_check(),
                    Err(e) => {
                        warn!("Database health check failed: {}", e);
                        metrics::record_health_check_failure();
                    }
                }
            }
        }
    });

    info!("Crossflow Engine is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown: stop detached polls and resolver tasks first
    swap_executor.shutdown();
    quote_resolver.shutdown();
    cross_chain_resolver.shutdown();

    // Abort background tasks
    api_handle.abort();
    scheduler_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Crossflow Engine stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,crossflow_engine=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
