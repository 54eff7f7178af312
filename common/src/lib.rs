//! Shared domain types for the auto-trading worker.
//!
//! Every other crate in the workspace speaks in terms of the normalized
//! [`UnifiedSignal`] and the validated [`BotConfig`] defined here.

pub mod bot_config;
pub mod config_store;
pub mod signal;

pub use bot_config::{AutomationMode, BotConfig, BotConfigRow, ConfigError, MarketType, OrderType};
pub use config_store::{BotConfigLoader, BotConfigStore, InMemoryBotConfigStore, PgBotConfigStore};
pub use signal::{Direction, ParseEnumError, SignalAction, SignalSource, UnifiedSignal};

pub use rust_decimal::Decimal;
pub use uuid::Uuid;
