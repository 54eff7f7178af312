//! Replicates a master's filled trade onto follower accounts

use anyhow::{Context, Result};
use common::{AutomationMode, BotConfig, BotConfigLoader, UnifiedSignal};
use decision_ledger::{DecisionLedger, DecisionPatch, LedgerError, LedgerStep, NewDecision};
use execution::{ExecutionRequest, OrderPlan, TradeExecutor};
use portfolio_risk::RiskEvaluator;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{EXECUTION_FAILED, EXECUTION_SKIPPED, PROCESSING_ERROR};

/// How much of a follower's capital a copied trade uses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Allocation {
    Fixed(Decimal),
    Percentage(Decimal),
}

impl Allocation {
    /// Position size for a follower, never above their capital
    pub fn size_for(&self, capital: Decimal) -> Decimal {
        let size = match self {
            Allocation::Fixed(amount) => *amount,
            Allocation::Percentage(pct) => capital * *pct / Decimal::ONE_HUNDRED,
        };
        size.min(capital).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerSubscription {
    pub follower_id: Uuid,
    pub strategy_id: Uuid,
    pub allocation: Allocation,
    /// Account to trade on; the follower bot's default otherwise
    pub platform_id: Option<Uuid>,
}

#[async_trait::async_trait]
pub trait FollowerStore: Send + Sync {
    /// Active subscriptions to a strategy
    async fn followers(&self, strategy_id: Uuid) -> Result<Vec<FollowerSubscription>>;
}

#[derive(Default)]
pub struct InMemoryFollowerStore {
    subscriptions: RwLock<HashMap<Uuid, Vec<FollowerSubscription>>>,
}

impl InMemoryFollowerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, subscription: FollowerSubscription) {
        self.subscriptions
            .write()
            .await
            .entry(subscription.strategy_id)
            .or_default()
            .push(subscription);
    }
}

#[async_trait::async_trait]
impl FollowerStore for InMemoryFollowerStore {
    async fn followers(&self, strategy_id: Uuid) -> Result<Vec<FollowerSubscription>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .get(&strategy_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    follower_id: Uuid,
    strategy_id: Uuid,
    allocation_mode: String,
    allocation_value: Decimal,
    platform_id: Option<Uuid>,
}

pub struct PgFollowerStore {
    db_pool: Arc<PgPool>,
}

impl PgFollowerStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl FollowerStore for PgFollowerStore {
    async fn followers(&self, strategy_id: Uuid) -> Result<Vec<FollowerSubscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT follower_id, strategy_id, allocation_mode, allocation_value, platform_id
            FROM copy_trading_subscriptions
            WHERE strategy_id = $1 AND is_active = TRUE
            ORDER BY created_at
            "#,
        )
        .bind(strategy_id)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch copy-trading subscriptions")?;

        rows.into_iter()
            .map(|row| {
                let allocation = match row.allocation_mode.as_str() {
                    "fixed" => Allocation::Fixed(row.allocation_value),
                    "percentage" => Allocation::Percentage(row.allocation_value),
                    other => anyhow::bail!(
                        "subscription of {} has unknown allocation mode '{}'",
                        row.follower_id,
                        other
                    ),
                };
                Ok(FollowerSubscription {
                    follower_id: row.follower_id,
                    strategy_id: row.strategy_id,
                    allocation,
                    platform_id: row.platform_id,
                })
            })
            .collect()
    }
}

/// The filled trade being copied
#[derive(Debug, Clone)]
pub struct MasterTrade {
    pub user_id: Uuid,
    pub trade_id: String,
    pub signal: UnifiedSignal,
    pub plan: OrderPlan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopyReport {
    pub copied_count: u32,
    pub skipped_count: u32,
    pub errors: Vec<String>,
}

enum FollowerOutcome {
    Copied,
    Skipped,
    Failed(String),
}

pub struct CopyTrader {
    followers: Arc<dyn FollowerStore>,
    configs: BotConfigLoader,
    risk: Arc<RiskEvaluator>,
    executor: Arc<dyn TradeExecutor>,
    ledger: Arc<dyn DecisionLedger>,
}

impl CopyTrader {
    pub fn new(
        followers: Arc<dyn FollowerStore>,
        configs: BotConfigLoader,
        risk: Arc<RiskEvaluator>,
        executor: Arc<dyn TradeExecutor>,
        ledger: Arc<dyn DecisionLedger>,
    ) -> Self {
        Self {
            followers,
            configs,
            risk,
            executor,
            ledger,
        }
    }

    /// Copy onto every follower; failures are collected, never returned
    pub async fn replicate_to_followers(&self, strategy_id: Uuid, master: &MasterTrade) -> CopyReport {
        let mut report = CopyReport::default();

        let followers = match self.followers.followers(strategy_id).await {
            Ok(followers) => followers,
            Err(e) => {
                warn!(strategy_id = %strategy_id, error = %e, "Could not load followers");
                report.errors.push(format!("followers of {}: {:#}", strategy_id, e));
                return report;
            }
        };

        for subscription in followers {
            if subscription.follower_id == master.user_id {
                continue;
            }
            let failure = match self.copy_to(&subscription, master).await {
                Ok(FollowerOutcome::Copied) => {
                    report.copied_count += 1;
                    continue;
                }
                Ok(FollowerOutcome::Skipped) => {
                    report.skipped_count += 1;
                    continue;
                }
                Ok(FollowerOutcome::Failed(reason)) => reason,
                Err(e) => format!("{:#}", e),
            };
            warn!(
                follower_id = %subscription.follower_id,
                master_trade_id = %master.trade_id,
                error = %failure,
                "Copy trade failed"
            );
            report.errors.push(format!("{}: {}", subscription.follower_id, failure));
        }

        info!(
            strategy_id = %strategy_id,
            master_trade_id = %master.trade_id,
            copied = report.copied_count,
            skipped = report.skipped_count,
            errors = report.errors.len(),
            "Copy-trading fan-out finished"
        );
        report
    }

    async fn copy_to(&self, subscription: &FollowerSubscription, master: &MasterTrade) -> Result<FollowerOutcome> {
        let follower_id = subscription.follower_id;
        let bot = self
            .configs
            .load(follower_id)
            .await?
            .with_context(|| format!("follower {} has no bot configuration", follower_id))?;

        let record = self
            .ledger
            .create_record(NewDecision::from_signal(follower_id, &master.signal).with_master_trade(&master.trade_id))
            .await?;

        match self.run_copy(record.id, &bot, subscription, master).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = format!("{:#}", e);
                self.force_error(record.id, &message).await;
                Ok(FollowerOutcome::Failed(message))
            }
        }
    }

    async fn run_copy(
        &self,
        id: Uuid,
        bot: &BotConfig,
        subscription: &FollowerSubscription,
        master: &MasterTrade,
    ) -> Result<FollowerOutcome> {
        let follower_id = subscription.follower_id;
        self.ledger
            .append_log(
                id,
                LedgerStep::SignalReceived,
                "Copy of master trade",
                json!({ "master_user_id": master.user_id, "master_trade_id": master.trade_id }),
            )
            .await?;

        if bot.automation_mode != AutomationMode::FullAuto || !bot.is_active {
            let reason = format!("Follower bot is in {} mode", bot.automation_mode);
            self.reject(id, EXECUTION_SKIPPED, &reason).await?;
            return Ok(FollowerOutcome::Skipped);
        }

        let evaluation = self.risk.evaluate(&master.signal.symbol, bot, chrono::Utc::now()).await;
        self.ledger
            .append_log(
                id,
                LedgerStep::LimitsChecked,
                if evaluation.allowed { "Risk checks passed" } else { "Risk checks failed" },
                serde_json::to_value(&evaluation)?,
            )
            .await?;
        if !evaluation.allowed {
            let code = evaluation.code().unwrap_or("RISK_REJECTED");
            let reason = evaluation.reason().unwrap_or_default();
            self.reject(id, code, &reason).await?;
            return Ok(FollowerOutcome::Skipped);
        }

        let mut size = subscription.allocation.size_for(bot.total_capital);
        if let Some(adjusted) = evaluation.adjusted_capital {
            size = size.min(adjusted);
        }
        let platform_id = subscription.platform_id.or(bot.default_platform_id);
        let plan = master.plan.rescaled(size, platform_id);
        let request = ExecutionRequest::new(follower_id, plan)
            .with_idempotency_key(format!("{}:{}", master.signal.id, follower_id));

        self.ledger
            .append_log(
                id,
                LedgerStep::ExecuteCalled,
                "Submitting copy trade",
                json!({ "idempotency_key": request.idempotency_key, "position_size": size }),
            )
            .await?;

        match self.executor.execute(&request).await {
            Ok(response) if response.is_filled() => {
                self.ledger
                    .append_log(
                        id,
                        LedgerStep::ExchangeResponse,
                        "Copy trade filled",
                        serde_json::to_value(&response)?,
                    )
                    .await?;
                self.ledger
                    .update_record(id, DecisionPatch::accepted(response.trade_id))
                    .await?;
                Ok(FollowerOutcome::Copied)
            }
            Ok(response) => {
                let reason = response.failure_reason();
                self.fail(id, &reason, serde_json::to_value(&response)?).await?;
                Ok(FollowerOutcome::Failed(reason))
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail(id, &reason, json!({ "error": reason })).await?;
                Ok(FollowerOutcome::Failed(reason))
            }
        }
    }

    async fn reject(&self, id: Uuid, code: &str, reason: &str) -> Result<()> {
        self.ledger
            .append_log(id, LedgerStep::Rejected, reason, json!({ "code": code }))
            .await?;
        self.ledger
            .update_record(id, DecisionPatch::rejected(code, reason))
            .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, reason: &str, data: serde_json::Value) -> Result<()> {
        self.ledger.append_log(id, LedgerStep::Error, reason, data).await?;
        self.ledger
            .update_record(id, DecisionPatch::error(EXECUTION_FAILED, reason))
            .await?;
        Ok(())
    }

    /// Best effort, like the master pipeline
    async fn force_error(&self, id: Uuid, message: &str) {
        if let Err(e) = self
            .ledger
            .append_log(id, LedgerStep::Error, message, json!({ "code": PROCESSING_ERROR }))
            .await
        {
            warn!(decision_id = %id, error = %e, "Could not log copy-trade error");
        }
        match self
            .ledger
            .update_record(id, DecisionPatch::error(PROCESSING_ERROR, message))
            .await
        {
            Ok(_) | Err(LedgerError::TerminalState { .. }) => {}
            Err(e) => warn!(decision_id = %id, error = %e, "Could not mark copy decision as failed"),
        }
    }
}
