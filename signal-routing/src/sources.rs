// Raw signal rows
// Each upstream engine writes its own row shape; these adapters turn them into UnifiedSignal

use chrono::{DateTime, Utc};
use common::{Direction, ParseEnumError, SignalAction, SignalSource, UnifiedSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Confidence assigned to webhook alerts that carry no score
pub const UNSCORED_ALERT_CONFIDENCE: f64 = 50.0;

/// Output of the chart-pattern recognition engine
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PatternSignalRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub signal_type: String,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: f64,
    pub pattern_name: String,
    pub detected_at: DateTime<Utc>,
}

/// Streaming tick from the realtime engine
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RealtimeSignalRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub action: String,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: f64,
    pub engine: String,
    pub tick_at: DateTime<Utc>,
}

/// Third-party alert delivered through the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookAlertRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticker: String,
    pub interval: Option<String>,
    pub action: String,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: Option<f64>,
    pub alert_name: Option<String>,
    pub status: String,
    pub received_at: DateTime<Utc>,
}

/// Row from the legacy heuristic engine; `score` is a 0..1 fraction
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LegacySignalRow {
    pub id: i64,
    pub user_id: Uuid,
    pub symbol: String,
    pub timeframe: String,
    pub direction: String,
    pub entry: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub score: f64,
    pub strategy: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One raw candidate, tagged by the source that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RawSignal {
    Pattern(PatternSignalRow),
    Realtime(RealtimeSignalRow),
    Webhook(WebhookAlertRow),
    Legacy(LegacySignalRow),
}

impl RawSignal {
    pub fn source(&self) -> SignalSource {
        match self {
            RawSignal::Pattern(_) => SignalSource::PatternEngine,
            RawSignal::Realtime(_) => SignalSource::RealtimeEngine,
            RawSignal::Webhook(_) => SignalSource::WebhookAlert,
            RawSignal::Legacy(_) => SignalSource::LegacyEngine,
        }
    }

    pub fn normalize(self) -> Result<UnifiedSignal, ParseEnumError> {
        match self {
            RawSignal::Pattern(row) => normalize_pattern(row),
            RawSignal::Realtime(row) => normalize_realtime(row),
            RawSignal::Webhook(row) => normalize_webhook(row),
            RawSignal::Legacy(row) => normalize_legacy(row),
        }
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

pub fn normalize_pattern(row: PatternSignalRow) -> Result<UnifiedSignal, ParseEnumError> {
    let metadata = serde_json::json!({ "pattern_name": row.pattern_name });
    Ok(UnifiedSignal {
        id: row.id.to_string(),
        user_id: row.user_id,
        symbol: normalize_symbol(&row.symbol),
        timeframe: row.timeframe,
        action: row.signal_type.parse()?,
        entry_price: row.entry_price,
        stop_loss: row.stop_loss,
        take_profit: row.take_profit,
        confidence: row.confidence,
        source: SignalSource::PatternEngine,
        strategy: row.pattern_name,
        generated_at: row.detected_at,
        metadata,
    })
}

pub fn normalize_realtime(row: RealtimeSignalRow) -> Result<UnifiedSignal, ParseEnumError> {
    Ok(UnifiedSignal {
        id: row.id.to_string(),
        user_id: row.user_id,
        symbol: normalize_symbol(&row.symbol),
        timeframe: row.timeframe,
        action: row.action.parse()?,
        entry_price: row.price,
        stop_loss: row.stop_loss,
        take_profit: row.take_profit,
        confidence: row.confidence,
        source: SignalSource::RealtimeEngine,
        strategy: row.engine,
        generated_at: row.tick_at,
        metadata: serde_json::json!({}),
    })
}

pub fn normalize_webhook(row: WebhookAlertRow) -> Result<UnifiedSignal, ParseEnumError> {
    let metadata = serde_json::json!({
        "alert_status": row.status,
        "alert_name": row.alert_name,
    });
    Ok(UnifiedSignal {
        id: row.id.to_string(),
        user_id: row.user_id,
        symbol: normalize_symbol(&row.ticker),
        timeframe: row.interval.unwrap_or_default(),
        action: row.action.parse()?,
        entry_price: row.price,
        stop_loss: row.stop_loss,
        take_profit: row.take_profit,
        confidence: row.confidence.unwrap_or(UNSCORED_ALERT_CONFIDENCE),
        source: SignalSource::WebhookAlert,
        strategy: row.alert_name.unwrap_or_else(|| "webhook".to_string()),
        generated_at: row.received_at,
        metadata,
    })
}

pub fn normalize_legacy(row: LegacySignalRow) -> Result<UnifiedSignal, ParseEnumError> {
    let action = match row.direction.parse::<Direction>()? {
        Direction::Long => SignalAction::Buy,
        Direction::Short => SignalAction::Sell,
    };
    Ok(UnifiedSignal {
        id: row.id.to_string(),
        user_id: row.user_id,
        symbol: normalize_symbol(&row.symbol),
        timeframe: row.timeframe,
        action,
        entry_price: row.entry,
        stop_loss: row.sl,
        take_profit: row.tp,
        confidence: (row.score * 100.0).clamp(0.0, 100.0),
        source: SignalSource::LegacyEngine,
        strategy: row.strategy.unwrap_or_else(|| "legacy".to_string()),
        generated_at: row.created_at,
        metadata: serde_json::json!({}),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_legacy_score_scaled() {
        let row = LegacySignalRow {
            id: 42,
            user_id: Uuid::new_v4(),
            symbol: "eth/usdt".to_string(),
            timeframe: "4h".to_string(),
            direction: "short".to_string(),
            entry: dec!(3000),
            sl: None,
            tp: None,
            score: 0.82,
            strategy: None,
            created_at: Utc::now(),
        };
        let signal = RawSignal::Legacy(row).normalize().unwrap();
        assert_eq!(signal.id, "42");
        assert_eq!(signal.symbol, "ETH/USDT");
        assert_eq!(signal.action, SignalAction::Sell);
        assert!((signal.confidence - 82.0).abs() < 1e-9);
        assert_eq!(signal.source, SignalSource::LegacyEngine);
    }

    #[test]
    fn test_unscored_webhook_alert() {
        let row = WebhookAlertRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ticker: "BTC/USDT".to_string(),
            interval: None,
            action: "strong_buy".to_string(),
            price: dec!(50000),
            stop_loss: Some(dec!(48000)),
            take_profit: None,
            confidence: None,
            alert_name: None,
            status: "pending".to_string(),
            received_at: Utc::now(),
        };
        let signal = normalize_webhook(row).unwrap();
        assert_eq!(signal.confidence, UNSCORED_ALERT_CONFIDENCE);
        assert_eq!(signal.action, SignalAction::StrongBuy);
        assert_eq!(signal.strategy, "webhook");
    }

    #[test]
    fn test_bad_action_is_error() {
        let row = RealtimeSignalRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "SOL/USDT".to_string(),
            timeframe: "1m".to_string(),
            action: "HOLD".to_string(),
            price: dec!(100),
            stop_loss: None,
            take_profit: None,
            confidence: 90.0,
            engine: "rt".to_string(),
            tick_at: Utc::now(),
        };
        assert!(RawSignal::Realtime(row).normalize().is_err());
    }
}
