//! Scheduled order trigger evaluation
//!
//! Re-prices open orders against the live price path and transitions them
//! between lifecycle states. One order's failure never aborts the rest of
//! the batch; a missing price is a soft skip, not an order failure.

use super::{dca_due, evaluate_trigger, next_execution, Order, OrderKind, OrderStore};
use crate::config::SchedulerConfig;
use crate::coordinator::{keys, RequestCoordinator};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::providers::SwapProvider;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single evaluation cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub evaluated: usize,
    pub triggered: usize,
    pub advanced: usize,
    pub expired: usize,
    pub skipped: usize,
    pub errors: usize,
}

enum OrderOutcome {
    Idle,
    Skipped,
    Triggered,
    Expired,
    Advanced,
}

/// Periodic evaluator for limit and DCA orders.
pub struct TriggerEvaluator {
    store: Arc<dyn OrderStore>,
    prices: Arc<dyn SwapProvider>,
    coordinator: RequestCoordinator,
    trigger_window: Duration,
}

impl TriggerEvaluator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        prices: Arc<dyn SwapProvider>,
        coordinator: RequestCoordinator,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            prices,
            coordinator,
            trigger_window: Duration::hours(config.trigger_window_hours),
        }
    }

    /// Run one full cycle: expire lapsed execution windows, then evaluate
    /// every active order in isolation.
    pub async fn run_cycle(&self) -> EngineResult<CycleSummary> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let mut summary = CycleSummary::default();

        for order in self.store.triggered_orders().await? {
            if order.trigger_expires_at.map_or(false, |t| t <= now) {
                match self.store.mark_expired(order.id).await {
                    Ok(()) => {
                        summary.expired += 1;
                        metrics::record_order_expired();
                        info!("Order {} execution window lapsed", order.id);
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!("Failed to expire order {}: {}", order.id, e);
                    }
                }
            }
        }

        for order in self.store.active_orders().await? {
            summary.evaluated += 1;
            match self.process_order(&order, now).await {
                Ok(OrderOutcome::Triggered) => summary.triggered += 1,
                Ok(OrderOutcome::Advanced) => summary.advanced += 1,
                Ok(OrderOutcome::Expired) => summary.expired += 1,
                Ok(OrderOutcome::Skipped) => summary.skipped += 1,
                Ok(OrderOutcome::Idle) => {}
                Err(e) => {
                    summary.errors += 1;
                    metrics::record_order_eval_error();
                    warn!("Order {} evaluation failed: {}", order.id, e);
                    if let Err(e) = self
                        .store
                        .record_execution_error(order.id, &e.to_string())
                        .await
                    {
                        warn!("Failed to record error for order {}: {}", order.id, e);
                    }
                }
            }
        }

        metrics::observe_eval_duration(started.elapsed().as_secs_f64());
        debug!("Trigger cycle done: {:?}", summary);
        Ok(summary)
    }

    async fn process_order(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> EngineResult<OrderOutcome> {
        if order.expires_at.map_or(false, |t| t <= now) {
            self.store.mark_expired(order.id).await?;
            metrics::record_order_expired();
            info!("Order {} expired", order.id);
            return Ok(OrderOutcome::Expired);
        }

        match order.kind {
            OrderKind::Limit => self.process_limit(order, now).await,
            OrderKind::Dca => self.process_dca(order, now).await,
        }
    }

    async fn process_limit(
        &self,
        order: &Order,
        now: DateTime<Utc>,
    ) -> EngineResult<OrderOutcome> {
        let Some(price) = self
            .current_price(order.chain_id, &order.from_token_address)
            .await
        else {
            debug!("No price for order {}, skipping this cycle", order.id);
            return Ok(OrderOutcome::Skipped);
        };

        let Some(kind) = evaluate_trigger(order, &price) else {
            return Ok(OrderOutcome::Idle);
        };

        self.store
            .mark_triggered(order.id, kind, now, now + self.trigger_window)
            .await?;
        metrics::record_order_triggered(kind.as_str());
        info!(
            "Order {} triggered ({}) at price {}",
            order.id,
            kind.as_str(),
            price
        );
        Ok(OrderOutcome::Triggered)
    }

    async fn process_dca(&self, order: &Order, now: DateTime<Utc>) -> EngineResult<OrderOutcome> {
        if !dca_due(order, now) {
            return Ok(OrderOutcome::Idle);
        }

        let executed = order.intervals_executed + 1;
        let completed = order.intervals_total.map_or(false, |total| executed >= total);
        let next = if completed {
            None
        } else {
            order.cadence.map(|cadence| next_execution(now, cadence))
        };

        self.store
            .advance_dca(order.id, executed, next, completed)
            .await?;
        info!(
            "DCA order {} advanced to interval {}{}",
            order.id,
            executed,
            if completed { " (completed)" } else { "" }
        );
        Ok(OrderOutcome::Advanced)
    }

    /// Price through the coordinator's cached path. Failures and missing
    /// prices both come back as `None`: transient, not an order error.
    async fn current_price(&self, chain_id: u64, token_address: &str) -> Option<String> {
        let key = keys::price_key(chain_id, token_address);
        let ttl = self.coordinator.config().price_ttl();
        let prices = self.prices.clone();
        let token = token_address.to_string();

        let result = self
            .coordinator
            .dedupe(&key, ttl, move || async move {
                let price = prices.get_token_price(chain_id, &token).await?;
                serde_json::to_value(price).map_err(|e| EngineError::Internal(e.to_string()))
            })
            .await;

        match result {
            Ok(value) => serde_json::from_value::<Option<String>>(value)
                .ok()
                .flatten(),
            Err(e) => {
                debug!("Price fetch failed for {}: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::orders::{
        DcaCadence, MockOrderStore, OrderCondition, OrderStatus, TriggerKind,
    };
    use crate::providers::{Quote, TokenRef};
    use async_trait::async_trait;
    use chrono::Timelike;
    use uuid::Uuid;

    struct FixedPrice(Option<String>);

    #[async_trait]
    impl SwapProvider for FixedPrice {
        async fn get_quote(
            &self,
            _chain_id: u64,
            _from: &TokenRef,
            _to: &TokenRef,
            _amount_base: &str,
            _slippage_bps: u32,
        ) -> EngineResult<Quote> {
            unimplemented!("not exercised by evaluator tests")
        }

        async fn get_token_price(
            &self,
            _chain_id: u64,
            _token_address: &str,
        ) -> EngineResult<Option<String>> {
            Ok(self.0.clone())
        }
    }

    fn limit_order(token: &str, target: &str, take_profit: Option<&str>) -> Order {
        Order {
            id: Uuid::new_v4(),
            chain_id: 1,
            from_token_address: token.to_string(),
            kind: OrderKind::Limit,
            condition: OrderCondition::Above,
            target_price: target.to_string(),
            take_profit_price: take_profit.map(str::to_string),
            stop_loss_price: None,
            status: OrderStatus::Active,
            created_at: Utc::now(),
            expires_at: None,
            triggered_at: None,
            trigger_expires_at: None,
            triggered_by: None,
            execution_error: None,
            cadence: None,
            execution_hour: None,
            intervals_total: None,
            intervals_executed: 0,
            next_execution_at: None,
        }
    }

    fn evaluator(store: MockOrderStore, price: Option<&str>) -> TriggerEvaluator {
        TriggerEvaluator::new(
            Arc::new(store),
            Arc::new(FixedPrice(price.map(str::to_string))),
            RequestCoordinator::new(CoordinatorConfig::default()),
            &SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn triggers_take_profit_beyond_band_with_24h_window() {
        let order = limit_order("0xaaa", "100", Some("120"));
        let order_id = order.id;

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .returning(|| Ok(Vec::new()));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![order]));
        store
            .expect_mark_triggered()
            .withf(move |id, kind, at, expires| {
                *id == order_id
                    && *kind == TriggerKind::TakeProfit
                    && *expires - *at == Duration::hours(24)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let summary = evaluator(store, Some("125")).run_cycle().await.unwrap();
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn triggers_primary_target_between_target_and_take_profit() {
        let order = limit_order("0xaaa", "100", Some("120"));

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .returning(|| Ok(Vec::new()));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![order]));
        store
            .expect_mark_triggered()
            .withf(|_, kind, _, _| *kind == TriggerKind::Target)
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let summary = evaluator(store, Some("105")).run_cycle().await.unwrap();
        assert_eq!(summary.triggered, 1);
    }

    #[tokio::test]
    async fn missing_price_skips_without_failing_the_order() {
        let order = limit_order("0xaaa", "100", None);

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .returning(|| Ok(Vec::new()));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![order]));
        // No mark_triggered or record_execution_error expected

        let summary = evaluator(store, None).run_cycle().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.triggered, 0);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn one_failing_order_does_not_abort_the_batch() {
        let failing = limit_order("0xaaa", "100", None);
        let healthy = limit_order("0xbbb", "100", None);
        let failing_id = failing.id;
        let healthy_id = healthy.id;

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .returning(|| Ok(Vec::new()));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![failing, healthy]));
        store
            .expect_mark_triggered()
            .withf(move |id, _, _, _| *id == failing_id)
            .returning(|_, _, _, _| {
                Err(EngineError::Internal("row write failed".to_string()))
            });
        store
            .expect_mark_triggered()
            .withf(move |id, _, _, _| *id == healthy_id)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        store
            .expect_record_execution_error()
            .withf(move |id, _| *id == failing_id)
            .times(1)
            .returning(|_, _| Ok(()));

        let summary = evaluator(store, Some("150")).run_cycle().await.unwrap();
        assert_eq!(summary.triggered, 1);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_orders_and_windows() {
        let mut stale_active = limit_order("0xaaa", "100", None);
        stale_active.expires_at = Some(Utc::now() - Duration::hours(1));
        let stale_active_id = stale_active.id;

        let mut lapsed_triggered = limit_order("0xbbb", "100", None);
        lapsed_triggered.status = OrderStatus::Triggered;
        lapsed_triggered.trigger_expires_at = Some(Utc::now() - Duration::minutes(5));
        let lapsed_id = lapsed_triggered.id;

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .return_once(move || Ok(vec![lapsed_triggered]));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![stale_active]));
        store
            .expect_mark_expired()
            .withf(move |id| *id == lapsed_id)
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_mark_expired()
            .withf(move |id| *id == stale_active_id)
            .times(1)
            .returning(|_| Ok(()));

        let summary = evaluator(store, Some("50")).run_cycle().await.unwrap();
        assert_eq!(summary.expired, 2);
    }

    #[tokio::test]
    async fn dca_order_advances_and_completes_on_final_interval() {
        let now = Utc::now();
        let mut order = limit_order("0xaaa", "0", None);
        order.kind = OrderKind::Dca;
        order.cadence = Some(DcaCadence::Weekly);
        order.execution_hour = Some(now.hour());
        order.intervals_total = Some(5);
        order.intervals_executed = 4;
        order.next_execution_at = Some(now - Duration::minutes(10));
        let order_id = order.id;

        let mut store = MockOrderStore::new();
        store
            .expect_triggered_orders()
            .returning(|| Ok(Vec::new()));
        store
            .expect_active_orders()
            .return_once(move || Ok(vec![order]));
        store
            .expect_advance_dca()
            .withf(move |id, executed, next, completed| {
                *id == order_id && *executed == 5 && next.is_none() && *completed
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let summary = evaluator(store, Some("1")).run_cycle().await.unwrap();
        assert_eq!(summary.advanced, 1);
    }
}
