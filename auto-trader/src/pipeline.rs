//! One routed signal through filters, risk, payload, execution and the ledger

use crate::copy_trading::{CopyTrader, MasterTrade};
use crate::entitlements::{Capability, EntitlementChecker};
use crate::filters::{apply_filters, RuntimeContext};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{AutomationMode, BotConfig, MarketType, UnifiedSignal};
use decision_ledger::{DecisionLedger, DecisionPatch, LedgerError, LedgerStep, NewDecision};
use execution::{build_payload, ExecutionRequest, PlatformContext, PlatformMonitor, TradeExecutor};
use portfolio_risk::{start_of_day, RiskEvaluator, TradeHistoryStore};
use serde_json::json;
use signal_routing::RoutedSignal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EXECUTION_SKIPPED: &str = "EXECUTION_SKIPPED";
pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";

/// Optional success-probability estimate attached to accepted signals
#[async_trait::async_trait]
pub trait SuccessForecaster: Send + Sync {
    /// Probability in 0..=1
    async fn forecast(&self, signal: &UnifiedSignal) -> Result<f64>;
}

/// Where a signal ended up
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Executed {
        decision_id: Uuid,
        trade_id: Option<String>,
    },
    Filtered {
        decision_id: Uuid,
        code: String,
    },
    Failed {
        decision_id: Option<Uuid>,
        error: String,
    },
}

pub struct SignalProcessor {
    ledger: Arc<dyn DecisionLedger>,
    risk: Arc<RiskEvaluator>,
    trades: Arc<dyn TradeHistoryStore>,
    platforms: Arc<dyn PlatformMonitor>,
    entitlements: Arc<dyn EntitlementChecker>,
    executor: Arc<dyn TradeExecutor>,
    forecaster: Option<Arc<dyn SuccessForecaster>>,
    copy_trader: Option<Arc<CopyTrader>>,
}

impl SignalProcessor {
    pub fn new(
        ledger: Arc<dyn DecisionLedger>,
        risk: Arc<RiskEvaluator>,
        trades: Arc<dyn TradeHistoryStore>,
        platforms: Arc<dyn PlatformMonitor>,
        entitlements: Arc<dyn EntitlementChecker>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        Self {
            ledger,
            risk,
            trades,
            platforms,
            entitlements,
            executor,
            forecaster: None,
            copy_trader: None,
        }
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn SuccessForecaster>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    pub fn with_copy_trader(mut self, copy_trader: Arc<CopyTrader>) -> Self {
        self.copy_trader = Some(copy_trader);
        self
    }

    /// Process one signal; errors end up on the decision record, never returned
    pub async fn process(&self, routed: &RoutedSignal, now: DateTime<Utc>) -> ProcessOutcome {
        let record = match self
            .ledger
            .create_record(NewDecision::from_signal(routed.bot.user_id, &routed.signal))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(user_id = %routed.bot.user_id, signal_id = %routed.signal.id, error = %e, "Could not create decision record");
                return ProcessOutcome::Failed {
                    decision_id: None,
                    error: e.to_string(),
                };
            }
        };

        match self.run(record.id, routed, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(decision_id = %record.id, user_id = %routed.bot.user_id, error = %message, "Signal processing failed");
                self.force_error(record.id, &message).await;
                ProcessOutcome::Failed {
                    decision_id: Some(record.id),
                    error: message,
                }
            }
        }
    }

    async fn run(&self, id: Uuid, routed: &RoutedSignal, now: DateTime<Utc>) -> Result<ProcessOutcome> {
        let RoutedSignal { bot, signal } = routed;

        self.log(id, LedgerStep::SignalReceived, "Signal received", signal.snapshot())
            .await?;

        let ctx = self.runtime_context(bot, signal, now).await?;
        let filters = apply_filters(signal, bot, &ctx);
        self.log(
            id,
            LedgerStep::FiltersApplied,
            if filters.passed { "Filters passed" } else { "Filters failed" },
            json!({ "result": filters, "context": ctx }),
        )
        .await?;
        if !filters.passed {
            let code = filters.code.map(|c| c.as_str()).unwrap_or("FILTERED");
            let reason = filters.reason.unwrap_or_default();
            return self.reject(id, code, &reason).await;
        }

        let evaluation = self.risk.evaluate(&signal.symbol, bot, now).await;
        let evaluation_json = serde_json::to_value(&evaluation)?;
        self.log(
            id,
            LedgerStep::LimitsChecked,
            if evaluation.allowed { "Risk checks passed" } else { "Risk checks failed" },
            evaluation_json.clone(),
        )
        .await?;
        self.ledger
            .update_record(id, DecisionPatch::metadata(json!({ "risk": evaluation_json })))
            .await?;
        if !evaluation.allowed {
            let code = evaluation.code().unwrap_or("RISK_REJECTED");
            let reason = evaluation.reason().unwrap_or_default();
            return self.reject(id, code, &reason).await;
        }

        if bot.automation_mode != AutomationMode::FullAuto {
            let reason = format!("Bot is in {} mode; trade left for manual confirmation", bot.automation_mode);
            return self.reject(id, EXECUTION_SKIPPED, &reason).await;
        }

        let forecast = self.forecast(signal).await;
        let balance = match self.platforms.available_balance(bot.default_platform_id).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(user_id = %bot.user_id, error = %e, "Balance lookup failed, sizing from configured capital");
                None
            }
        };
        let platform = PlatformContext::new(bot.default_platform_id).with_balance(balance);
        let plan = build_payload(signal, bot, &platform, evaluation.adjusted_capital);
        let plan_json = serde_json::to_value(&plan)?;

        self.ledger
            .update_record(
                id,
                DecisionPatch::metadata(json!({ "order_plan": plan_json, "forecast": forecast })),
            )
            .await?;
        self.log(id, LedgerStep::AcceptedForExecution, "Order plan built", plan_json)
            .await?;

        let request = ExecutionRequest::new(bot.user_id, plan);
        self.log(
            id,
            LedgerStep::ExecuteCalled,
            "Submitting trade",
            json!({ "idempotency_key": request.idempotency_key }),
        )
        .await?;

        let response = match self.executor.execute(&request).await {
            Ok(response) => response,
            Err(e) => {
                let reason = e.to_string();
                return self.fail_execution(id, &reason, json!({ "error": reason })).await;
            }
        };
        let response_json = serde_json::to_value(&response)?;
        if !response.is_filled() {
            let reason = response.failure_reason();
            return self.fail_execution(id, &reason, response_json).await;
        }

        self.log(id, LedgerStep::ExchangeResponse, "Trade executed", response_json.clone())
            .await?;
        self.ledger
            .update_record(
                id,
                DecisionPatch::accepted(response.trade_id.clone())
                    .with_metadata(json!({ "execution": response_json })),
            )
            .await?;

        info!(
            decision_id = %id,
            user_id = %bot.user_id,
            symbol = %signal.symbol,
            trade_id = ?response.trade_id,
            "Signal executed"
        );

        if let (Some(copier), Some(strategy_id), Some(trade_id)) =
            (&self.copy_trader, bot.copy_strategy_id, response.trade_id.clone())
        {
            let master = MasterTrade {
                user_id: bot.user_id,
                trade_id,
                signal: signal.clone(),
                plan: request.plan.clone(),
            };
            copier.replicate_to_followers(strategy_id, &master).await;
        }

        Ok(ProcessOutcome::Executed {
            decision_id: id,
            trade_id: response.trade_id,
        })
    }

    async fn runtime_context(
        &self,
        bot: &BotConfig,
        signal: &UnifiedSignal,
        now: DateTime<Utc>,
    ) -> Result<RuntimeContext> {
        let user_id = bot.user_id;

        let automated_bots_allowed = self
            .entitlements
            .has_capability(user_id, Capability::AutomatedBots)
            .await
            .context("Entitlement check failed")?;
        let futures_allowed = match bot.market_type {
            MarketType::Futures => self
                .entitlements
                .has_capability(user_id, Capability::FuturesTrading)
                .await
                .context("Entitlement check failed")?,
            MarketType::Spot => true,
        };

        let active = self
            .trades
            .active_trades(user_id)
            .await
            .context("Failed to load active trades")?;
        let auto_trades_today = self
            .trades
            .automated_trades_since(user_id, start_of_day(now))
            .await
            .context("Failed to count today's automated trades")?;
        let last_trade_at = self
            .trades
            .last_trade_at(user_id, &signal.symbol)
            .await
            .context("Failed to read last trade time")?;

        let exchange_healthy = match self.platforms.is_healthy(bot.default_platform_id).await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Exchange health check failed, treating as unhealthy");
                false
            }
        };

        Ok(RuntimeContext {
            now,
            automated_bots_allowed,
            futures_allowed,
            auto_trades_today,
            open_auto_positions: active.iter().filter(|t| t.automated).count() as u32,
            active_trades: active.len() as u32,
            last_trade_at,
            open_positions: active
                .iter()
                .map(|t| (t.symbol.to_ascii_uppercase(), t.direction))
                .collect(),
            exchange_healthy,
        })
    }

    async fn forecast(&self, signal: &UnifiedSignal) -> Option<f64> {
        let forecaster = self.forecaster.as_ref()?;
        match forecaster.forecast(signal).await {
            Ok(probability) => Some(probability),
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "Forecast unavailable, continuing without it");
                None
            }
        }
    }

    async fn log(&self, id: Uuid, step: LedgerStep, message: &str, data: serde_json::Value) -> Result<()> {
        self.ledger.append_log(id, step, message, data).await?;
        Ok(())
    }

    async fn reject(&self, id: Uuid, code: &str, reason: &str) -> Result<ProcessOutcome> {
        debug!(decision_id = %id, code = code, "Signal rejected: {}", reason);
        self.log(id, LedgerStep::Rejected, reason, json!({ "code": code })).await?;
        self.ledger
            .update_record(id, DecisionPatch::rejected(code, reason))
            .await?;
        Ok(ProcessOutcome::Filtered {
            decision_id: id,
            code: code.to_string(),
        })
    }

    async fn fail_execution(&self, id: Uuid, reason: &str, data: serde_json::Value) -> Result<ProcessOutcome> {
        warn!(decision_id = %id, "Execution failed: {}", reason);
        self.log(id, LedgerStep::Error, reason, data).await?;
        self.ledger
            .update_record(id, DecisionPatch::error(EXECUTION_FAILED, reason))
            .await?;
        Ok(ProcessOutcome::Failed {
            decision_id: Some(id),
            error: reason.to_string(),
        })
    }

    /// Best effort: the ledger itself may be what failed
    async fn force_error(&self, id: Uuid, message: &str) {
        if let Err(e) = self
            .ledger
            .append_log(id, LedgerStep::Error, message, json!({ "code": PROCESSING_ERROR }))
            .await
        {
            warn!(decision_id = %id, error = %e, "Could not log processing error");
        }
        match self
            .ledger
            .update_record(id, DecisionPatch::error(PROCESSING_ERROR, message))
            .await
        {
            Ok(_) | Err(LedgerError::TerminalState { .. }) => {}
            Err(e) => warn!(decision_id = %id, error = %e, "Could not mark decision as failed"),
        }
    }
}
