//! Pre-trade risk evaluation: kill switches, loss ceilings and capital de-risking

use crate::config::{RiskConfig, RiskFailMode};
use crate::portfolio::{percent_of, Portfolio};
use crate::store::{EquitySnapshot, TradeHistoryStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::BotConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Advisory markers attached to an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlag {
    DailyLoss,
    HighDrawdown,
    HighExposure,
    CapitalReduced,
    RiskCheckUnavailable,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::DailyLoss => "DAILY_LOSS",
            RiskFlag::HighDrawdown => "HIGH_DRAWDOWN",
            RiskFlag::HighExposure => "HIGH_EXPOSURE",
            RiskFlag::CapitalReduced => "CAPITAL_REDUCED",
            RiskFlag::RiskCheckUnavailable => "RISK_CHECK_UNAVAILABLE",
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a trade is blocked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskViolation {
    KillSwitchActive {
        reason: String,
    },
    DailyLossLimitExceeded {
        loss: Decimal,
        limit: Decimal,
    },
    DailyLossPercentageExceeded {
        loss_percentage: Decimal,
        limit: Decimal,
    },
    MaxDrawdownExceeded {
        drawdown: Decimal,
        limit: Decimal,
    },
    MaxTotalExposureExceeded {
        exposure: Decimal,
        limit: Decimal,
    },
    MaxSymbolExposureExceeded {
        symbol: String,
        exposure: Decimal,
        limit: Decimal,
    },
    RiskCheckFailed {
        error: String,
    },
}

impl RiskViolation {
    /// Stable code written to the decision ledger
    pub fn code(&self) -> &'static str {
        match self {
            RiskViolation::KillSwitchActive { .. } => "KILL_SWITCH_ACTIVE",
            RiskViolation::DailyLossLimitExceeded { .. } => "DAILY_LOSS_LIMIT",
            RiskViolation::DailyLossPercentageExceeded { .. } => "DAILY_LOSS_PERCENTAGE_LIMIT",
            RiskViolation::MaxDrawdownExceeded { .. } => "MAX_DRAWDOWN_EXCEEDED",
            RiskViolation::MaxTotalExposureExceeded { .. } => "MAX_TOTAL_EXPOSURE",
            RiskViolation::MaxSymbolExposureExceeded { .. } => "MAX_SYMBOL_EXPOSURE",
            RiskViolation::RiskCheckFailed { .. } => "RISK_CHECK_FAILED",
        }
    }
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskViolation::KillSwitchActive { reason } => {
                write!(f, "Kill switch active: {}", reason)
            }
            RiskViolation::DailyLossLimitExceeded { loss, limit } => {
                write!(f, "Daily loss {} reached limit {}", loss.round_dp(2), limit)
            }
            RiskViolation::DailyLossPercentageExceeded { loss_percentage, limit } => {
                write!(f, "Daily loss {}% reached limit {}%", loss_percentage.round_dp(2), limit)
            }
            RiskViolation::MaxDrawdownExceeded { drawdown, limit } => {
                write!(f, "Drawdown {}% exceeds limit {}%", drawdown.round_dp(2), limit)
            }
            RiskViolation::MaxTotalExposureExceeded { exposure, limit } => {
                write!(f, "Total exposure {}% reached limit {}%", exposure.round_dp(2), limit)
            }
            RiskViolation::MaxSymbolExposureExceeded { symbol, exposure, limit } => {
                write!(
                    f,
                    "Exposure to {} at {}% reached limit {}%",
                    symbol,
                    exposure.round_dp(2),
                    limit
                )
            }
            RiskViolation::RiskCheckFailed { error } => {
                write!(f, "Risk check failed: {}", error)
            }
        }
    }
}

/// Figures the evaluation was based on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub daily_pnl: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown_percentage: Decimal,
    pub total_exposure_percentage: Decimal,
    pub symbol_exposure_percentage: Decimal,
}

/// Outcome of a risk evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvaluation {
    pub allowed: bool,
    pub violation: Option<RiskViolation>,
    /// Capital to size the order with when de-risking applied
    pub adjusted_capital: Option<Decimal>,
    pub flags: Vec<RiskFlag>,
    pub snapshot: RiskSnapshot,
}

impl RiskEvaluation {
    fn allowed(flags: Vec<RiskFlag>, adjusted_capital: Option<Decimal>, snapshot: RiskSnapshot) -> Self {
        Self {
            allowed: true,
            violation: None,
            adjusted_capital,
            flags,
            snapshot,
        }
    }

    fn rejected(violation: RiskViolation, flags: Vec<RiskFlag>, snapshot: RiskSnapshot) -> Self {
        Self {
            allowed: false,
            violation: Some(violation),
            adjusted_capital: None,
            flags,
            snapshot,
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.violation.as_ref().map(|v| v.to_string())
    }

    pub fn code(&self) -> Option<&'static str> {
        self.violation.as_ref().map(|v| v.code())
    }

    pub fn has_flag(&self, flag: RiskFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Daily loss check; `Err` carries the violation
pub fn check_daily_loss(
    daily_pnl: Decimal,
    capital: Decimal,
    max_loss: Option<Decimal>,
    max_loss_percentage: Option<Decimal>,
) -> Result<bool, RiskViolation> {
    if daily_pnl >= Decimal::ZERO {
        return Ok(false);
    }
    let loss = -daily_pnl;
    if let Some(limit) = max_loss {
        if loss >= limit {
            return Err(RiskViolation::DailyLossLimitExceeded { loss, limit });
        }
    }
    if let Some(limit) = max_loss_percentage {
        let loss_percentage = percent_of(loss, capital);
        if loss_percentage >= limit {
            return Err(RiskViolation::DailyLossPercentageExceeded { loss_percentage, limit });
        }
    }
    Ok(true)
}

/// Drawdown from the peak as a percentage
pub fn drawdown_percentage(equity: Decimal, peak: Decimal) -> Decimal {
    if peak <= Decimal::ZERO || equity >= peak {
        return Decimal::ZERO;
    }
    percent_of(peak - equity, peak)
}

/// Exposure check against the total and per-symbol ceilings
pub fn check_exposure(
    symbol: &str,
    total_percentage: Decimal,
    symbol_percentage: Decimal,
    total_limit: Decimal,
    symbol_limit: Decimal,
) -> Result<(), RiskViolation> {
    if total_percentage >= total_limit {
        return Err(RiskViolation::MaxTotalExposureExceeded {
            exposure: total_percentage,
            limit: total_limit,
        });
    }
    if symbol_percentage >= symbol_limit {
        return Err(RiskViolation::MaxSymbolExposureExceeded {
            symbol: symbol.to_string(),
            exposure: symbol_percentage,
            limit: symbol_limit,
        });
    }
    Ok(())
}

/// Evaluates whether a user may open another automated trade
pub struct RiskEvaluator {
    store: Arc<dyn TradeHistoryStore>,
    config: RiskConfig,
}

impl RiskEvaluator {
    pub fn new(store: Arc<dyn TradeHistoryStore>, config: RiskConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate with the configured failure policy applied
    pub async fn evaluate(&self, symbol: &str, bot: &BotConfig, now: DateTime<Utc>) -> RiskEvaluation {
        match self.evaluate_risk(symbol, bot, now).await {
            Ok(evaluation) => evaluation,
            Err(e) => match self.config.fail_mode {
                RiskFailMode::FailOpen => {
                    warn!(
                        user_id = %bot.user_id,
                        symbol = symbol,
                        error = %e,
                        "Risk data unavailable, allowing trade"
                    );
                    RiskEvaluation::allowed(
                        vec![RiskFlag::RiskCheckUnavailable],
                        None,
                        RiskSnapshot::default(),
                    )
                }
                RiskFailMode::FailClosed => {
                    error!(
                        user_id = %bot.user_id,
                        symbol = symbol,
                        error = %e,
                        "Risk data unavailable, rejecting trade"
                    );
                    RiskEvaluation::rejected(
                        RiskViolation::RiskCheckFailed { error: format!("{:#}", e) },
                        vec![RiskFlag::RiskCheckUnavailable],
                        RiskSnapshot::default(),
                    )
                }
            },
        }
    }

    /// Run every check in order; data access errors are returned as-is
    pub async fn evaluate_risk(
        &self,
        symbol: &str,
        bot: &BotConfig,
        now: DateTime<Utc>,
    ) -> Result<RiskEvaluation> {
        let user_id = bot.user_id;
        let capital = bot.total_capital;
        let mut flags = Vec::new();
        let mut snapshot = RiskSnapshot::default();

        let switches = self
            .store
            .kill_switches(user_id)
            .await
            .context("Failed to load kill switches")?;
        if let Some(switch) = switches
            .iter()
            .find(|k| k.applies_to(symbol, bot.default_platform_id, now))
        {
            info!(user_id = %user_id, symbol = symbol, reason = %switch.reason, "Kill switch blocks trade");
            return Ok(RiskEvaluation::rejected(
                RiskViolation::KillSwitchActive { reason: switch.reason.clone() },
                flags,
                snapshot,
            ));
        }

        let active = self
            .store
            .active_trades(user_id)
            .await
            .context("Failed to load active trades")?;
        let portfolio = Portfolio::from_trades(&active);
        let unrealized = portfolio.unrealized_pnl();

        let day_start = start_of_day(now);
        let realized_today: Decimal = self
            .store
            .closed_trades_since(user_id, day_start)
            .await
            .context("Failed to load today's closed trades")?
            .iter()
            .filter_map(|t| t.realized_pnl)
            .sum();
        snapshot.daily_pnl = realized_today + unrealized;

        match check_daily_loss(
            snapshot.daily_pnl,
            capital,
            bot.max_daily_loss,
            bot.max_daily_loss_percentage,
        ) {
            Ok(true) => flags.push(RiskFlag::DailyLoss),
            Ok(false) => {}
            Err(violation) => return Ok(self.reject(user_id, violation, flags, snapshot)),
        }

        let realized_total = self
            .store
            .realized_pnl_total(user_id)
            .await
            .context("Failed to sum realized PnL")?;
        let stored_peak = self
            .store
            .peak_equity(user_id)
            .await
            .context("Failed to read peak equity")?;
        snapshot.equity = capital + realized_total + unrealized;
        snapshot.peak_equity = snapshot.equity.max(capital).max(stored_peak.unwrap_or(Decimal::ZERO));
        snapshot.drawdown_percentage = drawdown_percentage(snapshot.equity, snapshot.peak_equity);

        if stored_peak.map_or(true, |peak| snapshot.peak_equity > peak) {
            self.store
                .record_equity_snapshot(&EquitySnapshot {
                    user_id,
                    equity: snapshot.equity,
                    peak_equity: snapshot.peak_equity,
                    drawdown_percentage: snapshot.drawdown_percentage,
                    recorded_at: now,
                })
                .await
                .context("Failed to record equity snapshot")?;
        }

        if let Some(limit) = bot.max_drawdown_percentage {
            if snapshot.drawdown_percentage > limit {
                let violation = RiskViolation::MaxDrawdownExceeded {
                    drawdown: snapshot.drawdown_percentage,
                    limit,
                };
                return Ok(self.reject(user_id, violation, flags, snapshot));
            }
            if snapshot.drawdown_percentage > limit * self.config.flag_threshold {
                flags.push(RiskFlag::HighDrawdown);
            }
        }

        snapshot.total_exposure_percentage = percent_of(portfolio.total_invested(), capital);
        snapshot.symbol_exposure_percentage = percent_of(portfolio.invested_in(symbol), capital);
        if let Err(violation) = check_exposure(
            symbol,
            snapshot.total_exposure_percentage,
            snapshot.symbol_exposure_percentage,
            bot.max_total_exposure_percentage,
            bot.max_symbol_exposure_percentage,
        ) {
            return Ok(self.reject(user_id, violation, flags, snapshot));
        }
        if snapshot.total_exposure_percentage > bot.max_total_exposure_percentage * self.config.flag_threshold {
            flags.push(RiskFlag::HighExposure);
        }

        let adjusted_capital = self.derisk(bot, &snapshot);
        if adjusted_capital.is_some() {
            flags.push(RiskFlag::CapitalReduced);
        }

        debug!(
            user_id = %user_id,
            symbol = symbol,
            daily_pnl = %snapshot.daily_pnl,
            drawdown = %snapshot.drawdown_percentage,
            exposure = %snapshot.total_exposure_percentage,
            flags = ?flags,
            "Risk evaluation passed"
        );

        Ok(RiskEvaluation::allowed(flags, adjusted_capital, snapshot))
    }

    /// Scaled-down capital, or `None` when no scaling applies
    fn derisk(&self, bot: &BotConfig, snapshot: &RiskSnapshot) -> Option<Decimal> {
        let derisk = &self.config.derisk;
        let mut factor = Decimal::ONE;

        if let Some(limit) = bot.max_drawdown_percentage {
            if snapshot.drawdown_percentage > limit * derisk.drawdown_threshold {
                factor *= derisk.drawdown_factor;
            }
        }
        if snapshot.total_exposure_percentage > bot.max_total_exposure_percentage * derisk.exposure_threshold {
            factor *= derisk.exposure_factor;
        }

        (factor < Decimal::ONE).then(|| bot.total_capital * factor)
    }

    fn reject(
        &self,
        user_id: Uuid,
        violation: RiskViolation,
        flags: Vec<RiskFlag>,
        snapshot: RiskSnapshot,
    ) -> RiskEvaluation {
        info!(user_id = %user_id, code = violation.code(), "Risk limit hit: {}", violation);
        RiskEvaluation::rejected(violation, flags, snapshot)
    }
}

/// Midnight UTC of the day containing `now`
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
