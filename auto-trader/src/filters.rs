//! Policy filters applied to a routed signal before risk evaluation.
//!
//! Everything here is pure: the caller gathers the [`RuntimeContext`] first, so
//! the same signal, bot and context always produce the same result.

use crate::entitlements::Capability;
use chrono::{DateTime, Utc};
use common::{AutomationMode, BotConfig, Direction, MarketType, UnifiedSignal};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterCode {
    EntitlementDenied,
    AutoTradingDisabled,
    BotDisabled,
    SourceNotAllowed,
    DirectionNotAllowed,
    LongTradesDisabled,
    ShortTradesDisabled,
    LowConfidence,
    MaxAutoTradesPerDay,
    MaxConcurrentAutoPositions,
    MaxTradesReached,
    ExchangeUnhealthy,
    CooldownActive,
    DuplicatePosition,
}

impl FilterCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCode::EntitlementDenied => "ENTITLEMENT_DENIED",
            FilterCode::AutoTradingDisabled => "AUTO_TRADING_DISABLED",
            FilterCode::BotDisabled => "BOT_DISABLED",
            FilterCode::SourceNotAllowed => "SOURCE_NOT_ALLOWED",
            FilterCode::DirectionNotAllowed => "DIRECTION_NOT_ALLOWED",
            FilterCode::LongTradesDisabled => "LONG_TRADES_DISABLED",
            FilterCode::ShortTradesDisabled => "SHORT_TRADES_DISABLED",
            FilterCode::LowConfidence => "LOW_CONFIDENCE",
            FilterCode::MaxAutoTradesPerDay => "MAX_AUTO_TRADES_PER_DAY",
            FilterCode::MaxConcurrentAutoPositions => "MAX_CONCURRENT_AUTO_POSITIONS",
            FilterCode::MaxTradesReached => "MAX_TRADES_REACHED",
            FilterCode::ExchangeUnhealthy => "EXCHANGE_UNHEALTHY",
            FilterCode::CooldownActive => "COOLDOWN_ACTIVE",
            FilterCode::DuplicatePosition => "DUPLICATE_POSITION",
        }
    }
}

impl fmt::Display for FilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub passed: bool,
    pub code: Option<FilterCode>,
    pub reason: Option<String>,
}

impl FilterResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            code: None,
            reason: None,
        }
    }

    pub fn fail(code: FilterCode, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            code: Some(code),
            reason: Some(reason.into()),
        }
    }
}

/// Facts about the user's account gathered before filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeContext {
    pub now: DateTime<Utc>,
    pub automated_bots_allowed: bool,
    pub futures_allowed: bool,
    /// Automated trades opened since midnight UTC
    pub auto_trades_today: u32,
    pub open_auto_positions: u32,
    pub active_trades: u32,
    /// Most recent trade on the signal's symbol
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Open (symbol, direction) pairs, symbols uppercased
    pub open_positions: HashSet<(String, Direction)>,
    pub exchange_healthy: bool,
}

impl RuntimeContext {
    /// Context with everything allowed and nothing open
    pub fn permissive(now: DateTime<Utc>) -> Self {
        Self {
            now,
            automated_bots_allowed: true,
            futures_allowed: true,
            auto_trades_today: 0,
            open_auto_positions: 0,
            active_trades: 0,
            last_trade_at: None,
            open_positions: HashSet::new(),
            exchange_healthy: true,
        }
    }

    fn has_open_position(&self, symbol: &str, direction: Direction) -> bool {
        self.open_positions
            .contains(&(symbol.to_ascii_uppercase(), direction))
    }
}

/// Run the filters in their fixed order; the first failure wins
pub fn apply_filters(signal: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    let checks: [fn(&UnifiedSignal, &BotConfig, &RuntimeContext) -> FilterResult; 11] = [
        check_entitlements,
        check_enabled,
        check_source,
        check_direction,
        check_confidence,
        check_daily_cap,
        check_concurrent_auto_cap,
        check_active_cap,
        check_exchange_health,
        check_cooldown,
        check_duplicate,
    ];

    checks
        .iter()
        .map(|check| check(signal, bot, ctx))
        .find(|result| !result.passed)
        .unwrap_or_else(FilterResult::pass)
}

fn check_entitlements(_: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    if !ctx.automated_bots_allowed {
        return FilterResult::fail(
            FilterCode::EntitlementDenied,
            Capability::AutomatedBots.denial_reason(),
        );
    }
    if bot.market_type == MarketType::Futures && !ctx.futures_allowed {
        return FilterResult::fail(
            FilterCode::EntitlementDenied,
            Capability::FuturesTrading.denial_reason(),
        );
    }
    FilterResult::pass()
}

fn check_enabled(_: &UnifiedSignal, bot: &BotConfig, _: &RuntimeContext) -> FilterResult {
    if bot.automation_mode == AutomationMode::Off {
        return FilterResult::fail(FilterCode::AutoTradingDisabled, "Auto-trading is turned off");
    }
    if !bot.is_active {
        return FilterResult::fail(FilterCode::BotDisabled, "Bot is not active");
    }
    FilterResult::pass()
}

fn check_source(signal: &UnifiedSignal, bot: &BotConfig, _: &RuntimeContext) -> FilterResult {
    match &bot.allowed_sources {
        Some(allowed) if !allowed.contains(&signal.source) => FilterResult::fail(
            FilterCode::SourceNotAllowed,
            format!("Signals from {} are not allowed for this bot", signal.source),
        ),
        _ => FilterResult::pass(),
    }
}

fn check_direction(signal: &UnifiedSignal, bot: &BotConfig, _: &RuntimeContext) -> FilterResult {
    let direction = signal.direction();
    if let Some(allowed) = &bot.allowed_directions {
        if !allowed.contains(&direction) {
            return FilterResult::fail(
                FilterCode::DirectionNotAllowed,
                format!("{} trades are not allowed for this bot", direction),
            );
        }
    }
    match direction {
        Direction::Long if !bot.long_trades_enabled => {
            FilterResult::fail(FilterCode::LongTradesDisabled, "Long trades are disabled")
        }
        Direction::Short if !bot.short_trades_enabled => {
            FilterResult::fail(FilterCode::ShortTradesDisabled, "Short trades are disabled")
        }
        _ => FilterResult::pass(),
    }
}

fn check_confidence(signal: &UnifiedSignal, bot: &BotConfig, _: &RuntimeContext) -> FilterResult {
    let min = bot.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);
    if signal.confidence < min {
        return FilterResult::fail(
            FilterCode::LowConfidence,
            format!("Confidence {:.1} is below the minimum of {:.1}", signal.confidence, min),
        );
    }
    FilterResult::pass()
}

fn check_daily_cap(_: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    match bot.max_auto_trades_per_day {
        Some(max) if ctx.auto_trades_today >= max => FilterResult::fail(
            FilterCode::MaxAutoTradesPerDay,
            format!("Daily limit of {} automated trades reached", max),
        ),
        _ => FilterResult::pass(),
    }
}

fn check_concurrent_auto_cap(_: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    match bot.max_concurrent_auto_positions {
        Some(max) if ctx.open_auto_positions >= max => FilterResult::fail(
            FilterCode::MaxConcurrentAutoPositions,
            format!("Limit of {} open automated positions reached", max),
        ),
        _ => FilterResult::pass(),
    }
}

fn check_active_cap(_: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    if ctx.active_trades >= bot.max_active_trades {
        return FilterResult::fail(
            FilterCode::MaxTradesReached,
            format!("Limit of {} active trades reached", bot.max_active_trades),
        );
    }
    FilterResult::pass()
}

fn check_exchange_health(_: &UnifiedSignal, _: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    if !ctx.exchange_healthy {
        return FilterResult::fail(FilterCode::ExchangeUnhealthy, "Exchange connection is unhealthy");
    }
    FilterResult::pass()
}

fn check_cooldown(signal: &UnifiedSignal, bot: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    let (Some(cooldown), Some(last)) = (bot.cooldown(), ctx.last_trade_at) else {
        return FilterResult::pass();
    };
    let elapsed = ctx.now - last;
    if elapsed > cooldown {
        return FilterResult::pass();
    }
    let remaining_secs = (cooldown - elapsed).num_seconds();
    let remaining_minutes = ((remaining_secs + 59) / 60).max(1);
    FilterResult::fail(
        FilterCode::CooldownActive,
        format!(
            "Cooldown active for {}: {} minute(s) remaining",
            signal.symbol, remaining_minutes
        ),
    )
}

fn check_duplicate(signal: &UnifiedSignal, _: &BotConfig, ctx: &RuntimeContext) -> FilterResult {
    if ctx.has_open_position(&signal.symbol, signal.direction()) {
        return FilterResult::fail(
            FilterCode::DuplicatePosition,
            format!("A {} position on {} is already open", signal.direction(), signal.symbol),
        );
    }
    FilterResult::pass()
}
