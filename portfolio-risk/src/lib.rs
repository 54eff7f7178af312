//! Portfolio & Risk Evaluation (Layer 3)
//!
//! Reads a user's trade history and decides whether another automated trade
//! may be opened, and with how much capital.

mod config;
mod portfolio;
mod risk;
mod store;

pub use config::{DeriskConfig, RiskConfig, RiskFailMode};
pub use portfolio::{percent_of, Portfolio, Position, TradeRecord, TradeStatus};
pub use risk::{
    check_daily_loss, check_exposure, drawdown_percentage, start_of_day, RiskEvaluation, RiskEvaluator,
    RiskFlag, RiskSnapshot, RiskViolation,
};
pub use store::{EquitySnapshot, InMemoryTradeHistory, KillSwitch, PgTradeHistoryStore, TradeHistoryStore};
