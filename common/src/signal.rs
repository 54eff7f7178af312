use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a stored string does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Where a signal originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    PatternEngine,
    RealtimeEngine,
    WebhookAlert,
    LegacyEngine,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::PatternEngine => "pattern_engine",
            SignalSource::RealtimeEngine => "realtime_engine",
            SignalSource::WebhookAlert => "webhook_alert",
            SignalSource::LegacyEngine => "legacy_engine",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Settings rows written by older dashboards use the short names.
        match s.trim().to_ascii_lowercase().as_str() {
            "pattern_engine" | "pattern" | "patterns" => Ok(SignalSource::PatternEngine),
            "realtime_engine" | "realtime" | "real_time" => Ok(SignalSource::RealtimeEngine),
            "webhook_alert" | "webhook" | "tradingview" => Ok(SignalSource::WebhookAlert),
            "legacy_engine" | "legacy" => Ok(SignalSource::LegacyEngine),
            _ => Err(ParseEnumError::new("signal source", s)),
        }
    }
}

/// Two-state trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Direction::Long)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            _ => Err(ParseEnumError::new("direction", s)),
        }
    }
}

/// Directional call carried by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    Buy,
    Sell,
    StrongBuy,
    StrongSell,
}

impl SignalAction {
    pub fn direction(&self) -> Direction {
        match self {
            SignalAction::Buy | SignalAction::StrongBuy => Direction::Long,
            SignalAction::Sell | SignalAction::StrongSell => Direction::Short,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::StrongBuy => "STRONG_BUY",
            SignalAction::StrongSell => "STRONG_SELL",
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "BUY" | "LONG" => Ok(SignalAction::Buy),
            "SELL" | "SHORT" => Ok(SignalAction::Sell),
            "STRONG_BUY" => Ok(SignalAction::StrongBuy),
            "STRONG_SELL" => Ok(SignalAction::StrongSell),
            _ => Err(ParseEnumError::new("signal action", s)),
        }
    }
}

/// A candidate trade normalized from any signal source.
///
/// Immutable once fetched: the pipeline only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSignal {
    /// Id scoped to the originating source
    pub id: String,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub action: SignalAction,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// 0 to 100
    pub confidence: f64,
    pub source: SignalSource,
    pub strategy: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl UnifiedSignal {
    pub fn direction(&self) -> Direction {
        self.action.direction()
    }

    /// Snapshot stored alongside the decision record
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
