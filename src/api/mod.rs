//! HTTP API for the dashboard edge tier
//!
//! Health and status endpoints plus the quote/execute surface. The quote
//! endpoints drive the resolvers, which model the dashboard's single active
//! form: the latest submitted request wins.

use crate::coordinator::RequestCoordinator;
use crate::error::{EngineError, EngineResult};
use crate::executor::{BridgeTransaction, SwapExecutor, SwapParams};
use crate::orders::SqlOrderStore;
use crate::providers::TokenRef;
use crate::resolver::{
    CrossChainInput, CrossChainResolver, CrossChainState, QuoteInput, QuoteResolver, QuoteState,
    ResolvePhase,
};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiConfig;

const QUOTE_WAIT: Duration = Duration::from_secs(20);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<SwapExecutor>,
    pub store: Arc<SqlOrderStore>,
    pub quote: Arc<QuoteResolver>,
    pub cross_chain: Arc<CrossChainResolver>,
    pub coordinator: RequestCoordinator,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> EngineResult<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/transactions", get(get_transactions))
        .route("/orders/stats", get(get_order_stats))
        .route("/quote", post(get_quote))
        .route("/quote/cross-chain", post(get_cross_chain_quote))
        .route("/quote/refresh", post(refresh_quotes))
        .route("/execute", post(execute_swap))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Config(format!("API bind failed: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the store is reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessResponse {
            ready: db_ok,
            database: db_ok,
        }),
    )
}

/// Engine status snapshot
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        transactions: state.executor.transactions().len(),
        near_rate_limit: state.coordinator.is_near_rate_limit(),
    })
}

/// Read-only execution history
async fn get_transactions(State(state): State<AppState>) -> impl IntoResponse {
    Json(TransactionsResponse {
        transactions: state.executor.transactions(),
    })
}

async fn get_order_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_stats().await {
        Ok(stats) => (StatusCode::OK, Json(serde_json::json!(stats))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.user_message() })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct QuoteRequest {
    chain_id: u64,
    from_token: TokenRef,
    to_token: TokenRef,
    amount: String,
    #[serde(default = "default_slippage_bps")]
    slippage_bps: u32,
}

fn default_slippage_bps() -> u32 {
    50
}

/// Submit the swap form state and wait for the resolver to settle.
async fn get_quote(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> impl IntoResponse {
    let mut rx = state.quote.subscribe();
    let _ = rx.borrow_and_update();

    state.quote.submit(Some(QuoteInput {
        chain_id: request.chain_id,
        from_token: request.from_token,
        to_token: request.to_token,
        amount: request.amount,
        slippage_bps: request.slippage_bps,
        enabled: true,
    }));

    let settled = await_settled(&mut rx, |s: &QuoteState| s.phase).await;
    Json(settled.unwrap_or_else(|| state.quote.state()))
}

#[derive(Debug, Deserialize)]
struct CrossChainQuoteRequest {
    from_chain: u64,
    to_chain: u64,
    from_token: TokenRef,
    to_token: TokenRef,
    amount: String,
    #[serde(default = "default_slippage_bps")]
    slippage_bps: u32,
}

async fn get_cross_chain_quote(
    State(state): State<AppState>,
    Json(request): Json<CrossChainQuoteRequest>,
) -> impl IntoResponse {
    let mut rx = state.cross_chain.subscribe();
    let _ = rx.borrow_and_update();

    state.cross_chain.submit(Some(CrossChainInput {
        from_chain: request.from_chain,
        to_chain: request.to_chain,
        from_token: request.from_token,
        to_token: request.to_token,
        amount: request.amount,
        slippage_bps: request.slippage_bps,
        enabled: true,
    }));

    let settled = await_settled(&mut rx, |s: &CrossChainState| s.phase).await;
    Json(settled.unwrap_or_else(|| state.cross_chain.state()))
}

/// Wait until the resolver reaches a settled phase for the request just
/// submitted, falling back to the current snapshot on timeout.
async fn await_settled<T, F>(rx: &mut watch::Receiver<T>, phase_of: F) -> Option<T>
where
    T: Clone,
    F: Fn(&T) -> ResolvePhase,
{
    tokio::time::timeout(QUOTE_WAIT, async {
        loop {
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
            let snapshot = rx.borrow_and_update().clone();
            if matches!(
                phase_of(&snapshot),
                ResolvePhase::Idle | ResolvePhase::Resolved | ResolvePhase::Errored
            ) {
                return snapshot;
            }
        }
    })
    .await
    .ok()
}

/// Force-refresh: bust the quote caches, bounded by the per-action throttle
/// so a click storm cannot bypass the coordinator.
async fn refresh_quotes(State(state): State<AppState>) -> impl IntoResponse {
    if state.coordinator.should_throttle("quote-refresh") {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "Refresh requested too quickly" })),
        );
    }
    state.coordinator.record_request("quote-refresh");
    state.coordinator.invalidate_prefix("quote:");
    state.coordinator.invalidate_prefix("xquote:");
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    from_chain: u64,
    to_chain: u64,
    from_token: TokenRef,
    to_token: TokenRef,
    amount: String,
    #[serde(default = "default_slippage_bps")]
    slippage_bps: u32,
    recipient: String,
    expected_to_amount: Option<String>,
}

async fn execute_swap(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    let params = SwapParams {
        from_chain: request.from_chain,
        to_chain: request.to_chain,
        from_token: request.from_token,
        to_token: request.to_token,
        amount: request.amount,
        slippage_bps: request.slippage_bps,
        recipient: request.recipient,
        expected_to_amount: request.expected_to_amount,
    };

    match state.executor.execute_swap(params).await {
        Ok(tx_hash) => (
            StatusCode::OK,
            Json(serde_json::json!({ "source_tx_hash": tx_hash })),
        ),
        Err(e) => (
            error_status(&e),
            Json(serde_json::json!({ "error": e.user_message() })),
        ),
    }
}

fn error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        EngineError::NoRoute | EngineError::AmountTooSmall => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Wallet(_) => StatusCode::BAD_REQUEST,
        EngineError::Network(_) | EngineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    transactions: usize,
    near_rate_limit: bool,
}

#[derive(Serialize)]
struct TransactionsResponse {
    transactions: Vec<BridgeTransaction>,
}
