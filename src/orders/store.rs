//! PostgreSQL order store

use super::{
    DcaCadence, Order, OrderCondition, OrderKind, OrderStatus, OrderStore, TriggerKind,
};
use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

/// Order persistence over Postgres
pub struct SqlOrderStore {
    pool: PgPool,
}

impl SqlOrderStore {
    /// Create a new store
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(EngineError::Database)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                from_token_address VARCHAR(66) NOT NULL,
                kind VARCHAR(10) NOT NULL,
                condition VARCHAR(10) NOT NULL,
                target_price TEXT NOT NULL,
                take_profit_price TEXT,
                stop_loss_price TEXT,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ,
                triggered_at TIMESTAMPTZ,
                trigger_expires_at TIMESTAMPTZ,
                triggered_by VARCHAR(20),
                execution_error TEXT,
                cadence VARCHAR(10),
                execution_hour INT,
                intervals_total INT,
                intervals_executed INT NOT NULL DEFAULT 0,
                next_execution_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_orders_status
            ON orders (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(EngineError::Database)?;
        Ok(())
    }

    /// Insert a new order
    pub async fn insert_order(&self, order: &Order) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, chain_id, from_token_address, kind, condition, target_price,
                 take_profit_price, stop_loss_price, status, created_at, expires_at,
                 cadence, execution_hour, intervals_total, intervals_executed,
                 next_execution_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(order.id)
        .bind(order.chain_id as i64)
        .bind(&order.from_token_address)
        .bind(order.kind.as_str())
        .bind(order.condition.as_str())
        .bind(&order.target_price)
        .bind(&order.take_profit_price)
        .bind(&order.stop_loss_price)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.expires_at)
        .bind(order.cadence.map(|c| c.as_str()))
        .bind(order.execution_hour.map(|h| h as i32))
        .bind(order.intervals_total.map(|t| t as i32))
        .bind(order.intervals_executed as i32)
        .bind(order.next_execution_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get order statistics
    pub async fn get_stats(&self) -> EngineResult<OrderStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'active') as active,
                COUNT(*) FILTER (WHERE status = 'triggered') as triggered,
                COUNT(*) FILTER (WHERE status = 'executed') as executed,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'expired') as expired
            FROM orders
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderStats {
            active: row.get::<i64, _>("active") as u64,
            triggered: row.get::<i64, _>("triggered") as u64,
            executed: row.get::<i64, _>("executed") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            expired: row.get::<i64, _>("expired") as u64,
        })
    }

    async fn orders_with_status(&self, status: OrderStatus) -> EngineResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chain_id, from_token_address, kind, condition, target_price,
                   take_profit_price, stop_loss_price, status, created_at, expires_at,
                   triggered_at, trigger_expires_at, triggered_by, execution_error,
                   cadence, execution_hour, intervals_total, intervals_executed,
                   next_execution_at
            FROM orders
            WHERE status = $1
            ORDER BY created_at
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_order).collect())
    }
}

fn row_to_order(row: PgRow) -> Order {
    let kind: String = row.get("kind");
    let condition: String = row.get("condition");
    let status: String = row.get("status");
    let triggered_by: Option<String> = row.get("triggered_by");
    let cadence: Option<String> = row.get("cadence");

    Order {
        id: row.get("id"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        from_token_address: row.get("from_token_address"),
        kind: OrderKind::parse(&kind).unwrap_or(OrderKind::Limit),
        condition: OrderCondition::parse(&condition).unwrap_or(OrderCondition::Above),
        target_price: row.get("target_price"),
        take_profit_price: row.get("take_profit_price"),
        stop_loss_price: row.get("stop_loss_price"),
        status: OrderStatus::parse(&status).unwrap_or(OrderStatus::Active),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        triggered_at: row.get("triggered_at"),
        trigger_expires_at: row.get("trigger_expires_at"),
        triggered_by: triggered_by.as_deref().and_then(TriggerKind::parse),
        execution_error: row.get("execution_error"),
        cadence: cadence.as_deref().and_then(DcaCadence::parse),
        execution_hour: row.get::<Option<i32>, _>("execution_hour").map(|h| h as u32),
        intervals_total: row.get::<Option<i32>, _>("intervals_total").map(|t| t as u32),
        intervals_executed: row.get::<i32, _>("intervals_executed") as u32,
        next_execution_at: row.get("next_execution_at"),
    }
}

#[async_trait]
impl OrderStore for SqlOrderStore {
    async fn active_orders(&self) -> EngineResult<Vec<Order>> {
        self.orders_with_status(OrderStatus::Active).await
    }

    async fn triggered_orders(&self) -> EngineResult<Vec<Order>> {
        self.orders_with_status(OrderStatus::Triggered).await
    }

    async fn mark_triggered(
        &self,
        id: Uuid,
        kind: TriggerKind,
        triggered_at: DateTime<Utc>,
        trigger_expires_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'triggered', triggered_by = $2, triggered_at = $3,
                trigger_expires_at = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(triggered_at)
        .bind(trigger_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_expired(&self, id: Uuid) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'expired', updated_at = NOW()
            WHERE id = $1 AND status IN ('active', 'triggered')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_execution_error(&self, id: Uuid, error: &str) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET execution_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_dca(
        &self,
        id: Uuid,
        intervals_executed: u32,
        next_execution_at: Option<DateTime<Utc>>,
        completed: bool,
    ) -> EngineResult<()> {
        let status = if completed { "completed" } else { "active" };
        sqlx::query(
            r#"
            UPDATE orders
            SET intervals_executed = $2, next_execution_at = $3, status = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(intervals_executed as i32)
        .bind(next_execution_at)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Order statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderStats {
    pub active: u64,
    pub triggered: u64,
    pub executed: u64,
    pub completed: u64,
    pub expired: u64,
}
