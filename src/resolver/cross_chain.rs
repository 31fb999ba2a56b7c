//! Cross-chain quote resolver
//!
//! Same contract as the single-chain resolver, generalized to a
//! `(from_chain, to_chain)` pair. Upstream aggregation is slower and
//! flakier here, so the debounce is fixed at the long interval and both
//! rate-limit and network failures re-enter the retry loop; everything
//! else is terminal.

use super::retry::RetryPolicy;
use super::{debounce, Debounce, ResolvePhase};
use crate::amount;
use crate::config::ResolverConfig;
use crate::coordinator::{keys, RequestCoordinator};
use crate::error::EngineError;
use crate::metrics;
use crate::providers::{BridgeProvider, CrossChainQuote, TokenRef};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CrossChainInput {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: TokenRef,
    pub to_token: TokenRef,
    /// Human decimal string
    pub amount: String,
    pub slippage_bps: u32,
    pub enabled: bool,
}

impl CrossChainInput {
    /// Cross-chain requires distinct chains; a same-chain pair resolves to
    /// idle by design, not as an error.
    fn request_key(&self) -> Option<(String, String)> {
        if !self.enabled || self.from_chain == self.to_chain {
            return None;
        }
        let amount_base = amount::to_base_units(&self.amount, self.from_token.decimals);
        if amount_base == "0" {
            return None;
        }
        let key = keys::cross_chain_quote_key(
            self.from_chain,
            self.to_chain,
            &self.from_token.address,
            &self.to_token.address,
            &amount_base,
            self.slippage_bps,
        );
        Some((key, amount_base))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedCrossChainQuote {
    pub key: String,
    /// Base units on the destination chain
    pub to_amount_base: String,
    /// Human units
    pub to_amount: String,
    /// Slippage-adjusted minimum, base units
    pub min_received_base: String,
    pub estimated_time_minutes: u64,
    pub bridge_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossChainState {
    pub phase: ResolvePhase,
    pub quote: Option<ResolvedCrossChainQuote>,
    pub error: Option<String>,
}

impl CrossChainState {
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

    fn resolved(quote: ResolvedCrossChainQuote) -> Self {
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

/// Debounced cross-chain quote resolver.
pub struct CrossChainResolver {
    input_tx: watch::Sender<Option<CrossChainInput>>,
    state_rx: watch::Receiver<CrossChainState>,
    task: JoinHandle<()>,
}

impl CrossChainResolver {
    pub fn spawn(
        coordinator: RequestCoordinator,
        provider: Arc<dyn BridgeProvider>,
        config: ResolverConfig,
    ) -> Self {
        let (input_tx, input_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(CrossChainState::idle());
        let task = tokio::spawn(run_loop(input_rx, state_tx, coordinator, provider, config));
        Self {
            input_tx,
            state_rx,
            task,
        }
    }

    pub fn submit(&self, input: Option<CrossChainInput>) {
        let _ = self.input_tx.send(input);
    }

    pub fn state(&self) -> CrossChainState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CrossChainState> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

fn retry_on(error: &EngineError) -> bool {
    matches!(error, EngineError::RateLimited | EngineError::Network(_))
}

async fn run_loop(
    mut input_rx: watch::Receiver<Option<CrossChainInput>>,
    state_tx: watch::Sender<CrossChainState>,
    coordinator: RequestCoordinator,
    provider: Arc<dyn BridgeProvider>,
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
                let _ = state_tx.send(CrossChainState::idle());
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

            let _ = state_tx.send(CrossChainState::phase(ResolvePhase::Validating));

            match debounce(
                &mut input_rx,
                Duration::from_millis(config.cross_chain_debounce_ms),
            )
            .await
            {
                Debounce::Elapsed => {}
                Debounce::Changed => continue 'process,
                Debounce::Closed => return,
            }

            let _ = state_tx.send(CrossChainState::phase(ResolvePhase::Fetching));

            let result = policy
                .run("cross-chain quote fetch", retry_on, |_| {
                    let coordinator = coordinator.clone();
                    let provider = provider.clone();
                    let key = key.clone();
                    let from = input.from_token.clone();
                    let to = input.to_token.clone();
                    let amount_base = amount_base.clone();
                    let from_chain = input.from_chain;
                    let to_chain = input.to_chain;
                    let slippage_bps = input.slippage_bps;
                    async move {
                        coordinator
                            .dedupe(&key, quote_ttl, move || async move {
                                let quote = provider
                                    .get_cross_chain_quote(
                                        from_chain,
                                        to_chain,
                                        &from,
                                        &to,
                                        &amount_base,
                                        slippage_bps,
                                    )
                                    .await?;
                                if let Some(error) = quote.error {
                                    return Err(crate::error::classify_provider_error(&error));
                                }
                                serde_json::to_value(quote)
                                    .map_err(|e| EngineError::Internal(e.to_string()))
                            })
                            .await
                    }
                })
                .await;

            let latest_key = input_rx
                .borrow()
                .clone()
                .and_then(|i| i.request_key().map(|(k, _)| k));
            if latest_key.as_deref() != Some(key.as_str()) {
                metrics::record_quote_resolution("stale");
                continue 'process;
            }

            match result.and_then(|value| {
                serde_json::from_value::<CrossChainQuote>(value)
                    .map_err(|e| EngineError::Internal(e.to_string()))
            }) {
                Ok(quote) => {
                    let to_amount =
                        amount::from_base_units(&quote.to_token_amount, input.to_token.decimals);
                    let min_received_base =
                        amount::apply_bps(&quote.to_token_amount, input.slippage_bps as i64);
                    metrics::record_quote_resolution("resolved");
                    let _ = state_tx.send(CrossChainState::resolved(ResolvedCrossChainQuote {
                        key: key.clone(),
                        to_amount_base: quote.to_token_amount,
                        to_amount,
                        min_received_base,
                        estimated_time_minutes: estimated_minutes(quote.estimated_time_secs),
                        bridge_name: quote.bridge_name,
                    }));
                }
                Err(e) => {
                    warn!("Cross-chain quote failed for {}: {}", key, e);
                    metrics::record_quote_resolution("errored");
                    let _ = state_tx.send(CrossChainState::errored(e.user_message()));
                }
            }
            break 'process;
        }
    }
}

/// Ceiling division: a 90-second bridge shows as 2 minutes.
fn estimated_minutes(secs: u64) -> u64 {
    (secs + 59) / 60
}
