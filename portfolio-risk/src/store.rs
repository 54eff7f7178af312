//! Trade history, kill switch and equity snapshot access

use crate::portfolio::{TradeRecord, TradeStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Emergency stop for automated trading
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KillSwitch {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Limit to one exchange account; `None` covers all
    pub platform_id: Option<Uuid>,
    /// Limit to one symbol; `None` covers all
    pub symbol: Option<String>,
    pub reason: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl KillSwitch {
    pub fn applies_to(&self, symbol: &str, platform_id: Option<Uuid>, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.expires_at.map_or(false, |at| at <= now) {
            return false;
        }
        let symbol_ok = self
            .symbol
            .as_ref()
            .map_or(true, |s| s.eq_ignore_ascii_case(symbol));
        let platform_ok = match (self.platform_id, platform_id) {
            (None, _) => true,
            (Some(scoped), Some(target)) => scoped == target,
            // Unknown account: a scoped switch still stops it
            (Some(_), None) => true,
        };
        symbol_ok && platform_ok
    }
}

/// Equity high-water mark written after each evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub user_id: Uuid,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown_percentage: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// Trait for trade history backends
#[async_trait::async_trait]
pub trait TradeHistoryStore: Send + Sync {
    async fn active_trades(&self, user_id: Uuid) -> Result<Vec<TradeRecord>>;

    async fn closed_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<TradeRecord>>;

    /// Realized PnL over the account's whole history
    async fn realized_pnl_total(&self, user_id: Uuid) -> Result<Decimal>;

    /// Automated trades opened at or after `since`
    async fn automated_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u32>;

    /// Opening time of the most recent trade on a symbol
    async fn last_trade_at(&self, user_id: Uuid, symbol: &str) -> Result<Option<DateTime<Utc>>>;

    async fn kill_switches(&self, user_id: Uuid) -> Result<Vec<KillSwitch>>;

    async fn peak_equity(&self, user_id: Uuid) -> Result<Option<Decimal>>;

    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()>;
}

/// In-memory trade history (for testing and development)
#[derive(Default)]
pub struct InMemoryTradeHistory {
    trades: RwLock<Vec<TradeRecord>>,
    kill_switches: RwLock<Vec<KillSwitch>>,
    snapshots: RwLock<Vec<EquitySnapshot>>,
}

impl InMemoryTradeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_trade(&self, trade: TradeRecord) {
        self.trades.write().await.push(trade);
    }

    pub async fn add_kill_switch(&self, kill_switch: KillSwitch) {
        self.kill_switches.write().await.push(kill_switch);
    }

    pub async fn snapshots(&self) -> Vec<EquitySnapshot> {
        self.snapshots.read().await.clone()
    }
}

#[async_trait::async_trait]
impl TradeHistoryStore for InMemoryTradeHistory {
    async fn active_trades(&self, user_id: Uuid) -> Result<Vec<TradeRecord>> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| t.user_id == user_id && t.is_active())
            .cloned()
            .collect())
    }

    async fn closed_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| t.user_id == user_id && t.status == TradeStatus::Closed)
            .filter(|t| t.closed_at.map_or(false, |at| at >= since))
            .cloned()
            .collect())
    }

    async fn realized_pnl_total(&self, user_id: Uuid) -> Result<Decimal> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| t.user_id == user_id)
            .filter_map(|t| t.realized_pnl)
            .sum())
    }

    async fn automated_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u32> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| t.user_id == user_id && t.automated && t.opened_at >= since)
            .count() as u32)
    }

    async fn last_trade_at(&self, user_id: Uuid, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let trades = self.trades.read().await;
        Ok(trades
            .iter()
            .filter(|t| t.user_id == user_id && t.symbol.eq_ignore_ascii_case(symbol))
            .map(|t| t.opened_at)
            .max())
    }

    async fn kill_switches(&self, user_id: Uuid) -> Result<Vec<KillSwitch>> {
        let switches = self.kill_switches.read().await;
        Ok(switches.iter().filter(|k| k.user_id == user_id).cloned().collect())
    }

    async fn peak_equity(&self, user_id: Uuid) -> Result<Option<Decimal>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.peak_equity)
            .max())
    }

    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    id: Uuid,
    user_id: Uuid,
    symbol: String,
    direction: String,
    status: String,
    invested_amount: Decimal,
    realized_pnl: Option<Decimal>,
    unrealized_pnl: Option<Decimal>,
    automated: bool,
    platform_id: Option<Uuid>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = anyhow::Error;

    fn try_from(row: TradeRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "active" | "open" => TradeStatus::Active,
            "closed" => TradeStatus::Closed,
            other => anyhow::bail!("trade {} has unknown status '{}'", row.id, other),
        };
        Ok(TradeRecord {
            id: row.id,
            user_id: row.user_id,
            symbol: row.symbol,
            direction: row.direction.parse::<Direction>()?,
            status,
            invested_amount: row.invested_amount,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            automated: row.automated,
            platform_id: row.platform_id,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
        })
    }
}

const TRADE_COLUMNS: &str = "id, user_id, symbol, direction, status, invested_amount, \
     realized_pnl, unrealized_pnl, automated, platform_id, opened_at, closed_at";

/// Postgres-backed trade history
pub struct PgTradeHistoryStore {
    db_pool: Arc<PgPool>,
}

impl PgTradeHistoryStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Create the snapshot table owned by the risk evaluator
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_snapshots (
                id BIGSERIAL PRIMARY KEY,
                user_id UUID NOT NULL,
                equity NUMERIC(20, 8) NOT NULL,
                peak_equity NUMERIC(20, 8) NOT NULL,
                drawdown_percentage NUMERIC(10, 4) NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create risk snapshot table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_risk_snapshots_user ON risk_snapshots(user_id, recorded_at)",
        )
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to create risk snapshot index")?;

        info!("Risk snapshot table initialized");
        Ok(())
    }

    async fn fetch_trades(&self, sql: &str, user_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Vec<TradeRecord>> {
        let mut query = sqlx::query_as::<_, TradeRow>(sql).bind(user_id);
        if let Some(since) = since {
            query = query.bind(since);
        }
        query
            .fetch_all(self.db_pool.as_ref())
            .await
            .context("Failed to fetch trades")?
            .into_iter()
            .map(TradeRecord::try_from)
            .collect()
    }
}

#[async_trait::async_trait]
impl TradeHistoryStore for PgTradeHistoryStore {
    async fn active_trades(&self, user_id: Uuid) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE user_id = $1 AND status IN ('active', 'open')",
            TRADE_COLUMNS
        );
        self.fetch_trades(&sql, user_id, None).await
    }

    async fn closed_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE user_id = $1 AND status = 'closed' AND closed_at >= $2",
            TRADE_COLUMNS
        );
        self.fetch_trades(&sql, user_id, Some(since)).await
    }

    async fn realized_pnl_total(&self, user_id: Uuid) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT SUM(realized_pnl) FROM trades WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to sum realized PnL")?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    async fn automated_trades_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u32> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM trades WHERE user_id = $1 AND automated = TRUE AND opened_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to count automated trades")?;

        Ok(count.max(0) as u32)
    }

    async fn last_trade_at(&self, user_id: Uuid, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let last = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(opened_at) FROM trades WHERE user_id = $1 AND UPPER(symbol) = UPPER($2)",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to read last trade time")?;

        Ok(last)
    }

    async fn kill_switches(&self, user_id: Uuid) -> Result<Vec<KillSwitch>> {
        let switches = sqlx::query_as::<_, KillSwitch>(
            r#"
            SELECT id, user_id, platform_id, symbol, reason, is_active, expires_at, created_at
            FROM kill_switches
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch kill switches")?;

        Ok(switches)
    }

    async fn peak_equity(&self, user_id: Uuid) -> Result<Option<Decimal>> {
        let peak = sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT MAX(peak_equity) FROM risk_snapshots WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.db_pool.as_ref())
        .await
        .context("Failed to read peak equity")?;

        Ok(peak)
    }

    async fn record_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_snapshots (user_id, equity, peak_equity, drawdown_percentage, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.user_id)
        .bind(snapshot.equity)
        .bind(snapshot.peak_equity)
        .bind(snapshot.drawdown_percentage)
        .bind(snapshot.recorded_at)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to record equity snapshot")?;

        Ok(())
    }
}
