//! Per-user trading bot configuration.
//!
//! The settings dashboard stores bots as loosely typed rows where nearly every
//! column is nullable. [`BotConfig::from_row`] resolves every default and
//! validates ranges once, so the rest of the pipeline works with plain values.

use crate::signal::{Direction, ParseEnumError, SignalSource};
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How much of the pipeline a bot is allowed to run unattended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    Off,
    FullAuto,
    SemiAuto,
}

impl AutomationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationMode::Off => "off",
            AutomationMode::FullAuto => "full_auto",
            AutomationMode::SemiAuto => "semi_auto",
        }
    }
}

impl fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "off" | "manual" | "disabled" => Ok(AutomationMode::Off),
            "full_auto" | "auto" => Ok(AutomationMode::FullAuto),
            "semi_auto" => Ok(AutomationMode::SemiAuto),
            _ => Err(ParseEnumError::new("automation mode", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Futures,
}

impl FromStr for MarketType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" | "perpetual" | "perp" => Ok(MarketType::Futures),
            _ => Err(ParseEnumError::new("market type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

impl FromStr for OrderType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            _ => Err(ParseEnumError::new("order type", s)),
        }
    }
}

/// Validation failures raised while loading a bot row
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("bot {user_id}: missing required field '{field}'")]
    MissingField { user_id: Uuid, field: &'static str },

    #[error("bot {user_id}: field '{field}' out of range ({value})")]
    OutOfRange {
        user_id: Uuid,
        field: &'static str,
        value: String,
    },

    #[error("bot {user_id}: {source}")]
    InvalidEnum {
        user_id: Uuid,
        #[source]
        source: ParseEnumError,
    },
}

/// Bot settings row exactly as stored by the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct BotConfigRow {
    pub user_id: Uuid,
    pub is_active: Option<bool>,
    pub auto_trading_mode: Option<String>,
    pub total_capital: Option<Decimal>,
    pub risk_percentage: Option<Decimal>,
    pub initial_order_percentage: Option<Decimal>,
    pub max_active_trades: Option<i32>,
    pub max_auto_trades_per_day: Option<i32>,
    pub max_concurrent_auto_positions: Option<i32>,
    pub max_daily_loss: Option<Decimal>,
    pub max_daily_loss_percentage: Option<Decimal>,
    pub max_drawdown_percentage: Option<Decimal>,
    pub max_total_exposure_percentage: Option<Decimal>,
    pub max_symbol_exposure_percentage: Option<Decimal>,
    pub market_type: Option<String>,
    pub leverage: Option<i32>,
    pub order_type: Option<String>,
    pub stop_loss_percentage: Option<Decimal>,
    pub take_profit_percentage: Option<Decimal>,
    pub dca_levels: Option<i32>,
    pub dca_step_percentage: Option<Decimal>,
    pub signal_source: Option<String>,
    pub allowed_signal_sources: Option<Vec<String>>,
    pub min_confidence: Option<f64>,
    pub allowed_directions: Option<Vec<String>>,
    pub long_trades_enabled: Option<bool>,
    pub short_trades_enabled: Option<bool>,
    pub cooldown_minutes: Option<i32>,
    pub allowed_symbols: Option<Vec<String>>,
    pub timeframe: Option<String>,
    pub default_platform_id: Option<Uuid>,
    pub copy_strategy_id: Option<Uuid>,
}

/// Validated bot configuration with every default resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    pub user_id: Uuid,
    pub is_active: bool,
    pub automation_mode: AutomationMode,

    pub total_capital: Decimal,
    /// Share of capital risked per trade, in percent
    pub risk_percentage: Decimal,
    /// Share of the position placed as the first order, in percent
    pub initial_order_percentage: Decimal,
    pub max_active_trades: u32,
    pub max_auto_trades_per_day: Option<u32>,
    pub max_concurrent_auto_positions: Option<u32>,
    pub max_daily_loss: Option<Decimal>,
    pub max_daily_loss_percentage: Option<Decimal>,
    pub max_drawdown_percentage: Option<Decimal>,
    pub max_total_exposure_percentage: Decimal,
    pub max_symbol_exposure_percentage: Decimal,

    pub market_type: MarketType,
    pub leverage: u32,
    pub order_type: OrderType,
    pub stop_loss_percentage: Decimal,
    pub take_profit_percentage: Decimal,
    pub dca_levels: u32,
    pub dca_step_percentage: Decimal,

    /// Source the router pulls from
    pub signal_source: SignalSource,
    pub allowed_sources: Option<Vec<SignalSource>>,
    /// Unset means "use the consumer's default" (source default in the router, 70 in the filter chain)
    pub min_confidence: Option<f64>,
    pub allowed_directions: Option<Vec<Direction>>,
    pub long_trades_enabled: bool,
    pub short_trades_enabled: bool,
    pub cooldown_minutes: Option<u32>,
    pub allowed_symbols: Option<Vec<String>>,
    pub timeframe: Option<String>,
    pub default_platform_id: Option<Uuid>,
    pub copy_strategy_id: Option<Uuid>,
}

pub const DEFAULT_RISK_PERCENTAGE: Decimal = dec!(2);
pub const DEFAULT_INITIAL_ORDER_PERCENTAGE: Decimal = dec!(25);
pub const DEFAULT_MAX_ACTIVE_TRADES: u32 = 5;
pub const DEFAULT_MAX_TOTAL_EXPOSURE_PERCENTAGE: Decimal = dec!(80);
pub const DEFAULT_MAX_SYMBOL_EXPOSURE_PERCENTAGE: Decimal = dec!(30);
pub const DEFAULT_STOP_LOSS_PERCENTAGE: Decimal = dec!(5);
pub const DEFAULT_TAKE_PROFIT_PERCENTAGE: Decimal = dec!(10);
pub const DEFAULT_DCA_STEP_PERCENTAGE: Decimal = dec!(2);
const MAX_LEVERAGE: u32 = 125;
const MAX_DCA_LEVELS: u32 = 20;

impl BotConfig {
    /// A full-auto bot with stock defaults, mostly for tests and tooling
    pub fn with_defaults(user_id: Uuid, total_capital: Decimal) -> Self {
        Self {
            user_id,
            is_active: true,
            automation_mode: AutomationMode::FullAuto,
            total_capital,
            risk_percentage: DEFAULT_RISK_PERCENTAGE,
            initial_order_percentage: DEFAULT_INITIAL_ORDER_PERCENTAGE,
            max_active_trades: DEFAULT_MAX_ACTIVE_TRADES,
            max_auto_trades_per_day: None,
            max_concurrent_auto_positions: None,
            max_daily_loss: None,
            max_daily_loss_percentage: None,
            max_drawdown_percentage: None,
            max_total_exposure_percentage: DEFAULT_MAX_TOTAL_EXPOSURE_PERCENTAGE,
            max_symbol_exposure_percentage: DEFAULT_MAX_SYMBOL_EXPOSURE_PERCENTAGE,
            market_type: MarketType::Spot,
            leverage: 1,
            order_type: OrderType::Market,
            stop_loss_percentage: DEFAULT_STOP_LOSS_PERCENTAGE,
            take_profit_percentage: DEFAULT_TAKE_PROFIT_PERCENTAGE,
            dca_levels: 0,
            dca_step_percentage: DEFAULT_DCA_STEP_PERCENTAGE,
            signal_source: SignalSource::PatternEngine,
            allowed_sources: None,
            min_confidence: None,
            allowed_directions: None,
            long_trades_enabled: true,
            short_trades_enabled: true,
            cooldown_minutes: None,
            allowed_symbols: None,
            timeframe: None,
            default_platform_id: None,
            copy_strategy_id: None,
        }
    }

    /// Validate a stored row and resolve its defaults
    pub fn from_row(row: BotConfigRow) -> Result<Self, ConfigError> {
        let user_id = row.user_id;
        let enum_err = |source: ParseEnumError| ConfigError::InvalidEnum { user_id, source };

        let total_capital = row.total_capital.ok_or(ConfigError::MissingField {
            user_id,
            field: "total_capital",
        })?;
        if total_capital <= Decimal::ZERO {
            return Err(out_of_range(user_id, "total_capital", total_capital));
        }

        let automation_mode = match row.auto_trading_mode.as_deref() {
            Some(mode) => mode.parse().map_err(enum_err)?,
            None => AutomationMode::Off,
        };

        let mut config = Self::with_defaults(user_id, total_capital);
        config.is_active = row.is_active.unwrap_or(false);
        config.automation_mode = automation_mode;

        if let Some(risk) = row.risk_percentage {
            config.risk_percentage = percentage(user_id, "risk_percentage", risk)?;
        }
        if let Some(initial) = row.initial_order_percentage {
            config.initial_order_percentage =
                percentage(user_id, "initial_order_percentage", initial)?;
        }
        if let Some(max) = row.max_active_trades {
            config.max_active_trades = count(user_id, "max_active_trades", max)?;
        }
        config.max_auto_trades_per_day = row
            .max_auto_trades_per_day
            .map(|v| count(user_id, "max_auto_trades_per_day", v))
            .transpose()?;
        config.max_concurrent_auto_positions = row
            .max_concurrent_auto_positions
            .map(|v| count(user_id, "max_concurrent_auto_positions", v))
            .transpose()?;

        if let Some(loss) = row.max_daily_loss {
            if loss <= Decimal::ZERO {
                return Err(out_of_range(user_id, "max_daily_loss", loss));
            }
            config.max_daily_loss = Some(loss);
        }
        config.max_daily_loss_percentage = row
            .max_daily_loss_percentage
            .map(|v| percentage(user_id, "max_daily_loss_percentage", v))
            .transpose()?;
        config.max_drawdown_percentage = row
            .max_drawdown_percentage
            .map(|v| percentage(user_id, "max_drawdown_percentage", v))
            .transpose()?;
        if let Some(total) = row.max_total_exposure_percentage {
            config.max_total_exposure_percentage =
                percentage(user_id, "max_total_exposure_percentage", total)?;
        }
        if let Some(symbol) = row.max_symbol_exposure_percentage {
            config.max_symbol_exposure_percentage =
                percentage(user_id, "max_symbol_exposure_percentage", symbol)?;
        }

        if let Some(market) = row.market_type.as_deref() {
            config.market_type = market.parse().map_err(enum_err)?;
        }
        if let Some(order) = row.order_type.as_deref() {
            config.order_type = order.parse().map_err(enum_err)?;
        }
        if let Some(leverage) = row.leverage {
            let leverage = count(user_id, "leverage", leverage)?;
            if leverage == 0 || leverage > MAX_LEVERAGE {
                return Err(out_of_range(user_id, "leverage", leverage));
            }
            config.leverage = leverage;
        }
        if config.market_type == MarketType::Spot {
            config.leverage = 1;
        }

        if let Some(sl) = row.stop_loss_percentage {
            config.stop_loss_percentage = percentage(user_id, "stop_loss_percentage", sl)?;
        }
        if let Some(tp) = row.take_profit_percentage {
            config.take_profit_percentage = percentage(user_id, "take_profit_percentage", tp)?;
        }
        if let Some(levels) = row.dca_levels {
            let levels = count(user_id, "dca_levels", levels)?;
            if levels > MAX_DCA_LEVELS {
                return Err(out_of_range(user_id, "dca_levels", levels));
            }
            config.dca_levels = levels;
        }
        if let Some(step) = row.dca_step_percentage {
            config.dca_step_percentage = percentage(user_id, "dca_step_percentage", step)?;
        }

        if let Some(source) = row.signal_source.as_deref() {
            config.signal_source = source.parse().map_err(enum_err)?;
        }
        config.allowed_sources = non_empty(row.allowed_signal_sources)
            .map(|sources| {
                sources
                    .iter()
                    .map(|s| s.parse::<SignalSource>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(enum_err)?;
        config.allowed_directions = non_empty(row.allowed_directions)
            .map(|dirs| {
                dirs.iter()
                    .map(|d| d.parse::<Direction>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .map_err(enum_err)?;

        if let Some(min) = row.min_confidence {
            if !(0.0..=100.0).contains(&min) {
                return Err(out_of_range(user_id, "min_confidence", min));
            }
            config.min_confidence = Some(min);
        }
        config.long_trades_enabled = row.long_trades_enabled.unwrap_or(true);
        config.short_trades_enabled = row.short_trades_enabled.unwrap_or(true);
        config.cooldown_minutes = match row.cooldown_minutes {
            Some(minutes) if minutes > 0 => Some(minutes as u32),
            Some(minutes) if minutes < 0 => {
                return Err(out_of_range(user_id, "cooldown_minutes", minutes))
            }
            _ => None,
        };
        config.allowed_symbols = non_empty(row.allowed_symbols)
            .map(|symbols| symbols.into_iter().map(|s| s.trim().to_ascii_uppercase()).collect());
        config.timeframe = row.timeframe.filter(|tf| !tf.trim().is_empty());
        config.default_platform_id = row.default_platform_id;
        config.copy_strategy_id = row.copy_strategy_id;

        Ok(config)
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_minutes.map(|m| Duration::minutes(m as i64))
    }

    /// Whether a symbol passes this bot's allow-list
    pub fn allows_symbol(&self, symbol: &str) -> bool {
        match &self.allowed_symbols {
            Some(symbols) => symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol)),
            None => true,
        }
    }
}

fn out_of_range(user_id: Uuid, field: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::OutOfRange {
        user_id,
        field,
        value: value.to_string(),
    }
}

fn percentage(user_id: Uuid, field: &'static str, value: Decimal) -> Result<Decimal, ConfigError> {
    if value > Decimal::ZERO && value <= dec!(100) {
        Ok(value)
    } else {
        Err(out_of_range(user_id, field, value))
    }
}

fn count(user_id: Uuid, field: &'static str, value: i32) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| out_of_range(user_id, field, value))
}

fn non_empty(values: Option<Vec<String>>) -> Option<Vec<String>> {
    values
        .map(|v| v.into_iter().filter(|s| !s.trim().is_empty()).collect::<Vec<_>>())
        .filter(|v| !v.is_empty())
}
