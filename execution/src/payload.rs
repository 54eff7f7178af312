//! Turns an accepted signal into a concrete order plan

use common::{BotConfig, Direction, MarketType, OrderType, SignalSource, UnifiedSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Share of the live balance the sizing may use
pub const BALANCE_USAGE: Decimal = dec!(0.95);

/// Decimal places kept on computed amounts and prices
const PRECISION: u32 = 8;

/// Exchange account the plan is built for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformContext {
    pub platform_id: Option<Uuid>,
    /// Live available balance, when the lookup succeeded
    pub available_balance: Option<Decimal>,
}

impl PlatformContext {
    pub fn new(platform_id: Option<Uuid>) -> Self {
        Self {
            platform_id,
            available_balance: None,
        }
    }

    pub fn with_balance(mut self, balance: Option<Decimal>) -> Self {
        self.available_balance = balance;
        self
    }
}

/// One averaging-down order below (long) or above (short) the entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaLevel {
    pub level: u32,
    pub price: Decimal,
    pub amount: Decimal,
}

/// Everything the executor needs to place a trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub platform_id: Option<Uuid>,
    pub symbol: String,
    pub market_type: MarketType,
    pub order_type: OrderType,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub position_size: Decimal,
    pub initial_amount: Decimal,
    pub dca_levels: Vec<DcaLevel>,
    pub leverage: u32,
    pub strategy: String,
    /// Signal the plan was built from; doubles as the idempotency key
    pub signal_id: String,
    pub source: SignalSource,
}

impl OrderPlan {
    /// Copy of this plan resized to `position_size` for another account
    pub fn rescaled(&self, position_size: Decimal, platform_id: Option<Uuid>) -> Self {
        let ratio = if self.position_size > Decimal::ZERO {
            position_size / self.position_size
        } else {
            Decimal::ZERO
        };
        Self {
            platform_id,
            position_size: position_size.round_dp(PRECISION),
            initial_amount: (self.initial_amount * ratio).round_dp(PRECISION),
            dca_levels: self
                .dca_levels
                .iter()
                .map(|level| DcaLevel {
                    amount: (level.amount * ratio).round_dp(PRECISION),
                    ..level.clone()
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Capital available for sizing after balance and risk adjustments
pub fn effective_capital(
    total_capital: Decimal,
    available_balance: Option<Decimal>,
    adjusted_capital: Option<Decimal>,
) -> Decimal {
    let mut capital = total_capital;
    if let Some(balance) = available_balance {
        capital = capital.min(balance * BALANCE_USAGE);
    }
    if let Some(adjusted) = adjusted_capital {
        capital = capital.min(adjusted);
    }
    capital.max(Decimal::ZERO)
}

/// Size so that hitting the stop loses `risk_percentage` of capital, never above capital
pub fn position_size(capital: Decimal, risk_percentage: Decimal, stop_loss_percentage: Decimal) -> Decimal {
    if stop_loss_percentage <= Decimal::ZERO {
        return capital;
    }
    let risk_amount = capital * risk_percentage / dec!(100);
    (risk_amount * dec!(100) / stop_loss_percentage).min(capital)
}

fn offset(price: Decimal, percentage: Decimal, up: bool) -> Decimal {
    let delta = price * percentage / dec!(100);
    if up {
        price + delta
    } else {
        price - delta
    }
}

/// Build the order plan for a signal under a bot's configuration.
///
/// `adjusted_capital` is the de-risked capital from the risk evaluation, if any.
pub fn build_payload(
    signal: &UnifiedSignal,
    bot: &BotConfig,
    platform: &PlatformContext,
    adjusted_capital: Option<Decimal>,
) -> OrderPlan {
    let direction = signal.direction();
    let long = direction.is_long();
    let entry = signal.entry_price;

    let capital = effective_capital(bot.total_capital, platform.available_balance, adjusted_capital);
    let position = position_size(capital, bot.risk_percentage, bot.stop_loss_percentage);
    let initial = position * bot.initial_order_percentage / dec!(100);

    let stop_loss = signal
        .stop_loss
        .unwrap_or_else(|| offset(entry, bot.stop_loss_percentage, !long));
    let take_profit = signal
        .take_profit
        .unwrap_or_else(|| offset(entry, bot.take_profit_percentage, long));

    // A long ladder stops before its price would reach zero
    let prices: Vec<(u32, Decimal)> = (1..=bot.dca_levels)
        .map(|level| (level, offset(entry, bot.dca_step_percentage * Decimal::from(level), !long)))
        .take_while(|(_, price)| *price > Decimal::ZERO)
        .collect();
    let dca_levels = if prices.is_empty() {
        Vec::new()
    } else {
        let per_level = (position - initial) / Decimal::from(prices.len() as u32);
        prices
            .into_iter()
            .map(|(level, price)| DcaLevel {
                level,
                price: price.round_dp(PRECISION),
                amount: per_level.round_dp(PRECISION),
            })
            .collect()
    };

    let leverage = match bot.market_type {
        MarketType::Spot => 1,
        MarketType::Futures => bot.leverage.max(1),
    };

    OrderPlan {
        platform_id: platform.platform_id.or(bot.default_platform_id),
        symbol: signal.symbol.clone(),
        market_type: bot.market_type,
        order_type: bot.order_type,
        direction,
        entry_price: entry,
        stop_loss: stop_loss.round_dp(PRECISION),
        take_profit: take_profit.round_dp(PRECISION),
        position_size: position.round_dp(PRECISION),
        initial_amount: initial.round_dp(PRECISION),
        dca_levels,
        leverage,
        strategy: signal.strategy.clone(),
        signal_id: signal.id.clone(),
        source: signal.source,
    }
}
