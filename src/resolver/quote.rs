//! Single-chain quote resolver

use super::retry::RetryPolicy;
use super::{debounce, Debounce, ResolvePhase};
use crate::amount;
use crate::config::ResolverConfig;
use crate::coordinator::{keys, RequestCoordinator};
use crate::error::EngineError;
use crate::metrics;
use crate::providers::{Quote, SwapProvider, TokenRef};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Current swap form state as the dashboard submits it.
#[derive(Debug, Clone)]
pub struct QuoteInput {
    pub chain_id: u64,
    pub from_token: TokenRef,
    pub to_token: TokenRef,
    /// Human decimal string
    pub amount: String,
    pub slippage_bps: u32,
    pub enabled: bool,
}

impl QuoteInput {
    /// Canonical dedupe key plus base-unit amount, or `None` when the input
    /// should resolve to idle without a network call.
    fn request_key(&self) -> Option<(String, String)> {
        if !self.enabled {
            return None;
        }
        let amount_base = amount::to_base_units(&self.amount, self.from_token.decimals);
        if amount_base == "0" {
            return None;
        }
        let key = keys::quote_key(
            self.chain_id,
            &self.from_token.address,
            &self.to_token.address,
            &amount_base,
            self.slippage_bps,
        );
        Some((key, amount_base))
    }
}

/// A committed quote, codec-derived; superseded by the next resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedQuote {
    pub key: String,
    /// Base units
    pub to_amount_base: String,
    /// Human units
    pub to_amount: String,
    /// Slippage-adjusted minimum, base units
    pub min_received_base: String,
    /// Output per input unit
    pub rate: String,
    pub route: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuoteState {
    pub phase: ResolvePhase,
    pub quote: Option<ResolvedQuote>,
    pub error: Option<String>,
}

impl QuoteState {
    fn idle() -> Self {
        Self {
            phase: ResolvePhase::Idle,
            quote: None,
            error: None,
        }
    }

    fn phase(phase: ResolvePhase) -> Self {
        Self {
            phase,
            quote: None,
            error: None,
        }
    }

    fn resolved(quote: ResolvedQuote) -> Self {
        Self {
            phase: ResolvePhase::Resolved,
            quote: Some(quote),
            error: None,
        }
    }

    fn errored(message: &str) -> Self {
        Self {
            phase: ResolvePhase::Errored,
            quote: None,
            error: Some(message.to_string()),
        }
    }
}

/// Debounced, coordinator-backed single-chain quote resolver.
pub struct QuoteResolver {
    input_tx: watch::Sender<Option<QuoteInput>>,
    state_rx: watch::Receiver<QuoteState>,
    task: JoinHandle<()>,
}

impl QuoteResolver {
    pub fn spawn(
        coordinator: RequestCoordinator,
        provider: Arc<dyn SwapProvider>,
        config: ResolverConfig,
    ) -> Self {
        let (input_tx, input_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(QuoteState::idle());
        let task = tokio::spawn(run_loop(input_rx, state_tx, coordinator, provider, config));
        Self {
            input_tx,
            state_rx,
            task,
        }
    }

    /// Replace the current request; `None` clears it. Last write wins.
    pub fn submit(&self, input: Option<QuoteInput>) {
        let _ = self.input_tx.send(input);
    }

    pub fn state(&self) -> QuoteState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn run_loop(
    mut input_rx: watch::Receiver<Option<QuoteInput>>,
    state_tx: watch::Sender<QuoteState>,
    coordinator: RequestCoordinator,
    provider: Arc<dyn SwapProvider>,
    config: ResolverConfig,
) {
    let policy = RetryPolicy::new(
        config.max_retries,
        Duration::from_millis(config.retry_base_delay_ms),
    );
    let quote_ttl = coordinator.config().quote_ttl();

    'outer: while input_rx.changed().await.is_ok() {
        'process: loop {
            let input = input_rx.borrow_and_update().clone();

            let Some((input, key, amount_base)) =
                input.and_then(|i| i.request_key().map(|(k, b)| (i, k, b)))
            else {
                // Fast-clear path: idle immediately, short window to
                // coalesce a burst of clears.
                let _ = state_tx.send(QuoteState::idle());
                match debounce(
                    &mut input_rx,
                    Duration::from_millis(config.clear_debounce_ms),
                )
                .await
                {
                    Debounce::Elapsed => continue 'outer,
                    Debounce::Changed => continue 'process,
                    Debounce::Closed => return,
                }
            };

            let _ = state_tx.send(QuoteState::phase(ResolvePhase::Validating));

            match debounce(&mut input_rx, Duration::from_millis(config.debounce_ms)).await {
                Debounce::Elapsed => {}
                Debounce::Changed => continue 'process,
                Debounce::Closed => return,
            }

            let _ = state_tx.send(QuoteState::phase(ResolvePhase::Fetching));

            let result = policy
                .run(
                    "quote fetch",
                    |e| matches!(e, EngineError::RateLimited),
                    |_| {
                        let coordinator = coordinator.clone();
                        let provider = provider.clone();
                        let key = key.clone();
                        let from = input.from_token.clone();
                        let to = input.to_token.clone();
                        let amount_base = amount_base.clone();
                        let chain_id = input.chain_id;
                        let slippage_bps = input.slippage_bps;
                        async move {
                            coordinator
                                .dedupe(&key, quote_ttl, move || async move {
                                    let quote = provider
                                        .get_quote(chain_id, &from, &to, &amount_base, slippage_bps)
                                        .await?;
                                    serde_json::to_value(quote)
                                        .map_err(|e| EngineError::Internal(e.to_string()))
                                })
                                .await
                        }
                    },
                )
                .await;

            // Discard a response whose key the user has typed past.
            let latest_key = input_rx
                .borrow()
                .clone()
                .and_then(|i| i.request_key().map(|(k, _)| k));
            if latest_key.as_deref() != Some(key.as_str()) {
                metrics::record_quote_resolution("stale");
                continue 'process;
            }

            match result.and_then(|value| {
                serde_json::from_value::<Quote>(value)
                    .map_err(|e| EngineError::Internal(e.to_string()))
            }) {
                Ok(quote) => {
                    let to_amount =
                        amount::from_base_units(&quote.to_amount, input.to_token.decimals);
                    let rate = amount::ratio(
                        &quote.to_amount,
                        input.to_token.decimals,
                        &amount_base,
                        input.from_token.decimals,
                    );
                    let min_received_base =
                        amount::apply_bps(&quote.to_amount, input.slippage_bps as i64);
                    metrics::record_quote_resolution("resolved");
                    let _ = state_tx.send(QuoteState::resolved(ResolvedQuote {
                        key: key.clone(),
                        to_amount_base: quote.to_amount,
                        to_amount,
                        min_received_base,
                        rate,
                        route: quote.route,
                    }));
                }
                Err(e) => {
                    warn!("Quote resolution failed for {}: {}", key, e);
                    metrics::record_quote_resolution("errored");
                    let _ = state_tx.send(QuoteState::errored(e.user_message()));
                }
            }
            break 'process;
        }
    }
}
