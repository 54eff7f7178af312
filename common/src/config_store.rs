//! Bot configuration loading

use crate::bot_config::{BotConfig, BotConfigRow};
use anyhow::{Context, Result};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Read access to stored bot settings
#[async_trait::async_trait]
pub trait BotConfigStore: Send + Sync {
    /// Raw settings row for a user, `None` when the user has no bot
    async fn load(&self, user_id: Uuid) -> Result<Option<BotConfigRow>>;

    /// Users whose bot is flagged active
    async fn active_user_ids(&self) -> Result<Vec<Uuid>>;
}

/// Loads rows and turns them into validated [`BotConfig`] values
#[derive(Clone)]
pub struct BotConfigLoader {
    store: Arc<dyn BotConfigStore>,
}

impl BotConfigLoader {
    pub fn new(store: Arc<dyn BotConfigStore>) -> Self {
        Self { store }
    }

    /// Missing bot is `Ok(None)`; an invalid row is an error
    pub async fn load(&self, user_id: Uuid) -> Result<Option<BotConfig>> {
        let Some(row) = self.store.load(user_id).await? else {
            debug!(user_id = %user_id, "No bot configuration found");
            return Ok(None);
        };
        let config = BotConfig::from_row(row)?;
        Ok(Some(config))
    }

    pub async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
        self.store.active_user_ids().await
    }
}

/// In-memory settings store (for testing and development)
pub struct InMemoryBotConfigStore {
    rows: tokio::sync::RwLock<HashMap<Uuid, BotConfigRow>>,
}

impl InMemoryBotConfigStore {
    pub fn new() -> Self {
        Self {
            rows: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, row: BotConfigRow) {
        self.rows.write().await.insert(row.user_id, row);
    }
}

impl Default for InMemoryBotConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BotConfigStore for InMemoryBotConfigStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<BotConfigRow>> {
        Ok(self.rows.read().await.get(&user_id).cloned())
    }

    async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
        let rows = self.rows.read().await;
        let mut ids: Vec<Uuid> = rows
            .values()
            .filter(|r| r.is_active.unwrap_or(false))
            .map(|r| r.user_id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Postgres-backed settings store reading the dashboard's `trading_bots` table
pub struct PgBotConfigStore {
    db_pool: Arc<PgPool>,
}

impl PgBotConfigStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl BotConfigStore for PgBotConfigStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<BotConfigRow>> {
        let row = sqlx::query_as::<_, BotConfigRow>(
            r#"
            SELECT
                user_id, is_active, auto_trading_mode, total_capital, risk_percentage,
                initial_order_percentage, max_active_trades, max_auto_trades_per_day,
                max_concurrent_auto_positions, max_daily_loss, max_daily_loss_percentage,
                max_drawdown_percentage, max_total_exposure_percentage,
                max_symbol_exposure_percentage, market_type, leverage, order_type,
                stop_loss_percentage, take_profit_percentage, dca_levels, dca_step_percentage,
                signal_source, allowed_signal_sources, min_confidence, allowed_directions,
                long_trades_enabled, short_trades_enabled, cooldown_minutes, allowed_symbols,
                timeframe, default_platform_id, copy_strategy_id
            FROM trading_bots
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.db_pool.as_ref())
        .await
        .context("Failed to load bot configuration")?;

        Ok(row)
    }

    async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id FROM trading_bots
            WHERE is_active = TRUE
            ORDER BY user_id
            "#,
        )
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to list active bots")?;

        Ok(ids)
    }
}
