//! Limit and DCA order models and trigger evaluation
//!
//! Orders live in the persistent store; the engine only reads current
//! price plus target fields and writes back status and trigger stamps.
//! Orders are never deleted here.

pub mod evaluator;
pub mod store;

pub use evaluator::{CycleSummary, TriggerEvaluator};
pub use store::SqlOrderStore;

use crate::amount::cmp_decimal;
use crate::error::EngineResult;

use async_trait::async_trait;
use chrono::{DateTime, Months, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Limit,
    Dca,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Limit => "limit",
            OrderKind::Dca => "dca",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "limit" => Some(OrderKind::Limit),
            "dca" => Some(OrderKind::Dca),
            _ => None,
        }
    }
}

/// Direction of the primary price condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderCondition {
    Above,
    Below,
}

impl OrderCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderCondition::Above => "above",
            OrderCondition::Below => "below",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "above" => Some(OrderCondition::Above),
            "below" => Some(OrderCondition::Below),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Triggered,
    Executed,
    Completed,
    Expired,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Triggered => "triggered",
            OrderStatus::Executed => "executed",
            OrderStatus::Completed => "completed",
            OrderStatus::Expired => "expired",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(OrderStatus::Active),
            "triggered" => Some(OrderStatus::Triggered),
            "executed" => Some(OrderStatus::Executed),
            "completed" => Some(OrderStatus::Completed),
            "expired" => Some(OrderStatus::Expired),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Which sub-condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Target,
    TakeProfit,
    StopLoss,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Target => "target",
            TriggerKind::TakeProfit => "take_profit",
            TriggerKind::StopLoss => "stop_loss",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "target" => Some(TriggerKind::Target),
            "take_profit" => Some(TriggerKind::TakeProfit),
            "stop_loss" => Some(TriggerKind::StopLoss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcaCadence {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl DcaCadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            DcaCadence::Daily => "daily",
            DcaCadence::Weekly => "weekly",
            DcaCadence::Biweekly => "biweekly",
            DcaCadence::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(DcaCadence::Daily),
            "weekly" => Some(DcaCadence::Weekly),
            "biweekly" => Some(DcaCadence::Biweekly),
            "monthly" => Some(DcaCadence::Monthly),
            _ => None,
        }
    }
}

/// Order row as the store hands it to the evaluator. Prices are decimal
/// strings end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub chain_id: u64,
    pub from_token_address: String,
    pub kind: OrderKind,
    pub condition: OrderCondition,
    pub target_price: String,
    pub take_profit_price: Option<String>,
    pub stop_loss_price: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub trigger_expires_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<TriggerKind>,
    pub execution_error: Option<String>,
    pub cadence: Option<DcaCadence>,
    pub execution_hour: Option<u32>,
    pub intervals_total: Option<u32>,
    pub intervals_executed: u32,
    pub next_execution_at: Option<DateTime<Utc>>,
}

/// Row-level order persistence. Isolation between orders is the caller's
/// responsibility, not the store's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn active_orders(&self) -> EngineResult<Vec<Order>>;
    async fn triggered_orders(&self) -> EngineResult<Vec<Order>>;
    async fn mark_triggered(
        &self,
        id: Uuid,
        kind: TriggerKind,
        triggered_at: DateTime<Utc>,
        trigger_expires_at: DateTime<Utc>,
    ) -> EngineResult<()>;
    async fn mark_expired(&self, id: Uuid) -> EngineResult<()>;
    async fn record_execution_error(&self, id: Uuid, error: &str) -> EngineResult<()>;
    async fn advance_dca(
        &self,
        id: Uuid,
        intervals_executed: u32,
        next_execution_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> EngineResult<()>;
}

/// Decide which sub-condition, if any, a price satisfies.
///
/// The take-profit band is checked first: a price that has run beyond
/// take-profit reports the more specific condition even though the primary
/// target is also satisfied. A price between target and take-profit still
/// reports the primary target. Stop-loss is last. First match wins; there
/// is never a double trigger.
pub fn evaluate_trigger(order: &Order, price: &str) -> Option<TriggerKind> {
    if let Some(tp) = &order.take_profit_price {
        let crossed = match order.condition {
            OrderCondition::Above => cmp_decimal(price, tp) != Ordering::Less,
            OrderCondition::Below => cmp_decimal(price, tp) != Ordering::Greater,
        };
        if crossed {
            return Some(TriggerKind::TakeProfit);
        }
    }

    let primary = match order.condition {
        OrderCondition::Above => cmp_decimal(price, &order.target_price) == Ordering::Greater,
        OrderCondition::Below => cmp_decimal(price, &order.target_price) == Ordering::Less,
    };
    if primary {
        return Some(TriggerKind::Target);
    }

    if let Some(sl) = &order.stop_loss_price {
        let crossed = match order.condition {
            OrderCondition::Above => cmp_decimal(price, sl) != Ordering::Greater,
            OrderCondition::Below => cmp_decimal(price, sl) != Ordering::Less,
        };
        if crossed {
            return Some(TriggerKind::StopLoss);
        }
    }

    None
}

/// A DCA order is due once its scheduled time has passed and the clock is
/// inside the configured execution hour.
pub fn dca_due(order: &Order, now: DateTime<Utc>) -> bool {
    let Some(next) = order.next_execution_at else {
        return false;
    };
    if next > now {
        return false;
    }
    match order.execution_hour {
        Some(hour) => now.hour() == hour,
        None => true,
    }
}

/// Next scheduled execution from the cadence. Monthly follows the
/// calendar; the rest are fixed-day steps.
pub fn next_execution(now: DateTime<Utc>, cadence: DcaCadence) -> DateTime<Utc> {
    match cadence {
        DcaCadence::Daily => now + chrono::Duration::days(1),
        DcaCadence::Weekly => now + chrono::Duration::days(7),
        DcaCadence::Biweekly => now + chrono::Duration::days(14),
        DcaCadence::Monthly => now
            .checked_add_months(Months::new(1))
            .unwrap_or(now + chrono::Duration::days(30)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn limit_order(condition: OrderCondition, target: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            chain_id: 1,
            from_token_address: "0xaaa".to_string(),
            kind: OrderKind::Limit,
            condition,
            target_price: target.to_string(),
            take_profit_price: None,
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

    #[test]
    fn primary_target_fires_between_target_and_take_profit() {
        let mut order = limit_order(OrderCondition::Above, "100");
        order.take_profit_price = Some("120".to_string());

        assert_eq!(evaluate_trigger(&order, "105"), Some(TriggerKind::Target));
    }

    #[test]
    fn take_profit_wins_beyond_its_band() {
        let mut order = limit_order(OrderCondition::Above, "100");
        order.take_profit_price = Some("120".to_string());

        assert_eq!(
            evaluate_trigger(&order, "125"),
            Some(TriggerKind::TakeProfit)
        );
    }

    #[test]
    fn stop_loss_fires_only_when_nothing_else_matches() {
        let mut order = limit_order(OrderCondition::Above, "100");
        order.take_profit_price = Some("120".to_string());
        order.stop_loss_price = Some("80".to_string());

        assert_eq!(evaluate_trigger(&order, "75"), Some(TriggerKind::StopLoss));
        assert_eq!(evaluate_trigger(&order, "90"), None);
    }

    #[test]
    fn below_condition_mirrors_the_comparisons() {
        let mut order = limit_order(OrderCondition::Below, "100");
        order.take_profit_price = Some("80".to_string());
        order.stop_loss_price = Some("130".to_string());

        assert_eq!(evaluate_trigger(&order, "95"), Some(TriggerKind::Target));
        assert_eq!(
            evaluate_trigger(&order, "75"),
            Some(TriggerKind::TakeProfit)
        );
        assert_eq!(evaluate_trigger(&order, "135"), Some(TriggerKind::StopLoss));
        assert_eq!(evaluate_trigger(&order, "110"), None);
    }

    #[test]
    fn exact_target_price_does_not_trigger() {
        let order = limit_order(OrderCondition::Above, "100");
        assert_eq!(evaluate_trigger(&order, "100"), None);
        assert_eq!(evaluate_trigger(&order, "100.000001"), Some(TriggerKind::Target));
    }

    #[test]
    fn dca_due_respects_schedule_and_hour_gate() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 14, 5, 0).unwrap();
        let mut order = limit_order(OrderCondition::Above, "0");
        order.kind = OrderKind::Dca;
        order.cadence = Some(DcaCadence::Daily);
        order.execution_hour = Some(14);
        order.next_execution_at = Some(now - chrono::Duration::hours(1));

        assert!(dca_due(&order, now));

        order.execution_hour = Some(9);
        assert!(!dca_due(&order, now));

        order.execution_hour = Some(14);
        order.next_execution_at = Some(now + chrono::Duration::hours(1));
        assert!(!dca_due(&order, now));
    }

    #[test]
    fn next_execution_steps_follow_cadence() {
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
        assert_eq!(
            next_execution(now, DcaCadence::Daily),
            now + chrono::Duration::days(1)
        );
        assert_eq!(
            next_execution(now, DcaCadence::Biweekly),
            now + chrono::Duration::days(14)
        );
        // Jan 31 + 1 month clamps to the end of February
        assert_eq!(next_execution(now, DcaCadence::Monthly).month(), 2);
    }
}
