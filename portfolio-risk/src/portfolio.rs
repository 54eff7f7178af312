//! Account view built from a user's trade history

use chrono::{DateTime, Utc};
use common::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Active,
    Closed,
}

/// One trade as recorded by the execution side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub status: TradeStatus,
    /// Capital committed to the position
    pub invested_amount: Decimal,
    pub realized_pnl: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    /// Opened by the auto-trading worker rather than by hand
    pub automated: bool,
    pub platform_id: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn is_active(&self) -> bool {
        self.status == TradeStatus::Active
    }
}

/// Aggregated open positions for one user
#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    /// Invested capital by symbol
    positions: HashMap<String, Position>,
}

impl Portfolio {
    /// Create a new empty portfolio
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from trades; closed trades are ignored
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut portfolio = Self::new();
        for trade in trades.iter().filter(|t| t.is_active()) {
            portfolio.add_trade(trade);
        }
        portfolio
    }

    pub fn add_trade(&mut self, trade: &TradeRecord) {
        let key = trade.symbol.to_ascii_uppercase();
        let position = self.positions.entry(key.clone()).or_insert_with(|| Position {
            symbol: key,
            invested: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        });
        position.invested += trade.invested_amount;
        position.unrealized_pnl += trade.unrealized_pnl.unwrap_or(Decimal::ZERO);
    }

    /// Total capital committed across all open trades
    pub fn total_invested(&self) -> Decimal {
        self.positions.values().map(|p| p.invested).sum()
    }

    pub fn invested_in(&self, symbol: &str) -> Decimal {
        self.positions
            .get(&symbol.to_ascii_uppercase())
            .map(|p| p.invested)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }
}

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub invested: Decimal,
    pub unrealized_pnl: Decimal,
}

/// `part` as a percentage of `whole`; zero when `whole` is not positive
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    part / whole * dec!(100)
}
