// Signal Source Adapters
// One adapter per upstream engine; each returns at most one fresh, qualifying candidate

use super::sources::RawSignal;
use super::storage::{CandidateQuery, SignalSourceStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::{BotConfig, SignalSource, UnifiedSignal};
use std::cmp::{Ordering, Reverse};
use std::sync::Arc;
use tracing::{debug, warn};

/// Freshness and confidence rules for one source
#[derive(Debug, Clone)]
pub struct AdapterPolicy {
    /// Window for timeframes at or below `short_timeframe_minutes`
    pub short_window: Duration,
    /// Window for everything else, including unknown timeframes
    pub long_window: Duration,
    pub short_timeframe_minutes: i64,
    /// Used when the bot has no minimum confidence of its own
    pub default_min_confidence: f64,
}

impl AdapterPolicy {
    pub fn for_source(source: SignalSource) -> Self {
        match source {
            SignalSource::PatternEngine => Self {
                short_window: Duration::minutes(15),
                long_window: Duration::minutes(60),
                short_timeframe_minutes: 15,
                default_min_confidence: 60.0,
            },
            // Streaming ticks go stale almost immediately
            SignalSource::RealtimeEngine => Self {
                short_window: Duration::minutes(1),
                long_window: Duration::minutes(1),
                short_timeframe_minutes: 0,
                default_min_confidence: 70.0,
            },
            SignalSource::WebhookAlert => Self {
                short_window: Duration::minutes(30),
                long_window: Duration::minutes(30),
                short_timeframe_minutes: 0,
                default_min_confidence: 0.0,
            },
            SignalSource::LegacyEngine => Self {
                short_window: Duration::minutes(60),
                long_window: Duration::minutes(60),
                short_timeframe_minutes: 0,
                default_min_confidence: 70.0,
            },
        }
    }

    pub fn window_for(&self, timeframe: &str) -> Duration {
        match timeframe_minutes(timeframe) {
            Some(minutes) if minutes <= self.short_timeframe_minutes => self.short_window,
            _ => self.long_window,
        }
    }

    /// Widest window, used to bound the storage query
    pub fn max_window(&self) -> Duration {
        self.short_window.max(self.long_window)
    }
}

/// Parse "1m", "15m", "4h", "1d", "1w" style timeframes into minutes
pub fn timeframe_minutes(timeframe: &str) -> Option<i64> {
    let tf = timeframe.trim().to_ascii_lowercase();
    if tf.len() < 2 {
        return None;
    }
    let (value, unit) = tf.split_at(tf.len() - 1);
    let value: i64 = value.parse().ok()?;
    let factor = match unit {
        "m" => 1,
        "h" => 60,
        "d" => 60 * 24,
        "w" => 60 * 24 * 7,
        _ => return None,
    };
    Some(value * factor)
}

/// Trait for per-source adapters
#[async_trait::async_trait]
pub trait SignalAdapter: Send + Sync {
    fn source(&self) -> SignalSource;

    /// Freshest qualifying candidate for this bot, if any
    async fn fetch_latest(&self, bot: &BotConfig, now: DateTime<Utc>) -> Result<Option<UnifiedSignal>>;
}

/// Adapter over a [`SignalSourceStore`] table for one source
pub struct SourceAdapter {
    source: SignalSource,
    policy: AdapterPolicy,
    store: Arc<dyn SignalSourceStore>,
}

impl SourceAdapter {
    pub fn new(source: SignalSource, store: Arc<dyn SignalSourceStore>) -> Self {
        Self {
            source,
            policy: AdapterPolicy::for_source(source),
            store,
        }
    }

    pub fn pattern_engine(store: Arc<dyn SignalSourceStore>) -> Self {
        Self::new(SignalSource::PatternEngine, store)
    }

    pub fn realtime_engine(store: Arc<dyn SignalSourceStore>) -> Self {
        Self::new(SignalSource::RealtimeEngine, store)
    }

    pub fn webhook_alert(store: Arc<dyn SignalSourceStore>) -> Self {
        Self::new(SignalSource::WebhookAlert, store)
    }

    pub fn legacy_engine(store: Arc<dyn SignalSourceStore>) -> Self {
        Self::new(SignalSource::LegacyEngine, store)
    }

    fn min_confidence(&self, bot: &BotConfig) -> f64 {
        bot.min_confidence.unwrap_or(self.policy.default_min_confidence)
    }

    fn qualifies(&self, signal: &UnifiedSignal, bot: &BotConfig, now: DateTime<Utc>) -> bool {
        let min_confidence = self.min_confidence(bot);
        let age = now - signal.generated_at;
        let fresh = age <= self.policy.window_for(&signal.timeframe) && age >= Duration::zero();
        let timeframe_ok = bot
            .timeframe
            .as_ref()
            .map_or(true, |tf| tf.eq_ignore_ascii_case(&signal.timeframe));

        fresh && timeframe_ok && bot.allows_symbol(&signal.symbol) && signal.confidence >= min_confidence
    }
}

#[async_trait::async_trait]
impl SignalAdapter for SourceAdapter {
    fn source(&self) -> SignalSource {
        self.source
    }

    async fn fetch_latest(&self, bot: &BotConfig, now: DateTime<Utc>) -> Result<Option<UnifiedSignal>> {
        let query = CandidateQuery {
            user_id: bot.user_id,
            since: now - self.policy.max_window(),
            symbols: bot.allowed_symbols.clone(),
            timeframe: bot.timeframe.clone(),
            min_confidence: self.min_confidence(bot),
        };

        let raw = self.store.candidates(self.source, &query).await?;
        let fetched = raw.len();
        let candidates: Vec<UnifiedSignal> = raw
            .into_iter()
            .filter_map(|r: RawSignal| match r.normalize() {
                Ok(signal) => Some(signal),
                Err(e) => {
                    warn!(source = %self.source, user_id = %bot.user_id, "Skipping malformed signal row: {}", e);
                    None
                }
            })
            .filter(|s| self.qualifies(s, bot, now))
            .collect();

        debug!(
            source = %self.source,
            user_id = %bot.user_id,
            fetched,
            qualifying = candidates.len(),
            "Fetched signal candidates"
        );

        let Some(latest) = select_latest(candidates) else {
            return Ok(None);
        };

        // Alerts are one-shot; engine snapshots stay readable until superseded.
        if self.source == SignalSource::WebhookAlert {
            if let Ok(alert_id) = latest.id.parse() {
                self.store.mark_alert_processed(alert_id).await?;
            }
        }

        Ok(Some(latest))
    }
}

/// Most recent candidate wins; identical timestamps fall back to the
/// lexically smallest id so the choice is deterministic.
pub fn select_latest(candidates: Vec<UnifiedSignal>) -> Option<UnifiedSignal> {
    candidates.into_iter().max_by(|a, b| compare_recency(a, b))
}

fn compare_recency(a: &UnifiedSignal, b: &UnifiedSignal) -> Ordering {
    (a.generated_at, Reverse(&a.id)).cmp(&(b.generated_at, Reverse(&b.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{LegacySignalRow, PatternSignalRow, RealtimeSignalRow, WebhookAlertRow};
    use crate::storage::{InMemorySignalSourceStore, ALERT_PROCESSED};
    use common::SignalAction;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn pattern(user_id: Uuid, timeframe: &str, confidence: f64, at: DateTime<Utc>) -> PatternSignalRow {
        PatternSignalRow {
            id: Uuid::new_v4(),
            user_id,
            symbol: "BTC/USDT".to_string(),
            timeframe: timeframe.to_string(),
            signal_type: "BUY".to_string(),
            entry_price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            confidence,
            pattern_name: "double_bottom".to_string(),
            detected_at: at,
        }
    }

    fn signal(id: &str, at: DateTime<Utc>) -> UnifiedSignal {
        UnifiedSignal {
            id: id.to_string(),
            user_id: Uuid::nil(),
            symbol: "BTC/USDT".to_string(),
            timeframe: "1h".to_string(),
            action: SignalAction::Buy,
            entry_price: dec!(1),
            stop_loss: None,
            take_profit: None,
            confidence: 80.0,
            source: SignalSource::PatternEngine,
            strategy: "t".to_string(),
            generated_at: at,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!(timeframe_minutes("15m"), Some(15));
        assert_eq!(timeframe_minutes("4H"), Some(240));
        assert_eq!(timeframe_minutes("1d"), Some(1440));
        assert_eq!(timeframe_minutes("x"), None);
        assert_eq!(timeframe_minutes("abc"), None);
    }

    #[test]
    fn test_pattern_windows_by_timeframe() {
        let policy = AdapterPolicy::for_source(SignalSource::PatternEngine);
        assert_eq!(policy.window_for("5m"), Duration::minutes(15));
        assert_eq!(policy.window_for("15m"), Duration::minutes(15));
        assert_eq!(policy.window_for("1h"), Duration::minutes(60));
    }

    #[test]
    fn test_select_latest_tie_break() {
        let now = Utc::now();
        let picked = select_latest(vec![
            signal("b", now),
            signal("a", now),
            signal("z", now - Duration::minutes(1)),
        ])
        .unwrap();
        assert_eq!(picked.id, "a");

        let picked = select_latest(vec![signal("a", now - Duration::seconds(1)), signal("b", now)]).unwrap();
        assert_eq!(picked.id, "b");
        assert!(select_latest(vec![]).is_none());
    }

    #[tokio::test]
    async fn test_pattern_adapter_freshness_and_confidence() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();

        // stale for a 5m timeframe (20 min old, window 15)
        store.insert(RawSignal::Pattern(pattern(user, "5m", 90.0, now - Duration::minutes(20)))).await;
        // below source default of 60
        store.insert(RawSignal::Pattern(pattern(user, "1h", 40.0, now - Duration::minutes(2)))).await;
        let good = pattern(user, "1h", 75.0, now - Duration::minutes(30));
        let good_id = good.id.to_string();
        store.insert(RawSignal::Pattern(good)).await;

        let bot = BotConfig::with_defaults(user, dec!(1000));
        let adapter = SourceAdapter::pattern_engine(store.clone());
        let picked = adapter.fetch_latest(&bot, now).await.unwrap().unwrap();
        assert_eq!(picked.id, good_id);

        let mut strict = bot.clone();
        strict.min_confidence = Some(80.0);
        assert!(adapter.fetch_latest(&strict, now).await.unwrap().is_none());

        // pattern snapshots are never consumed
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_realtime_window_is_tight() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();
        store
            .insert(RawSignal::Realtime(RealtimeSignalRow {
                id: Uuid::new_v4(),
                user_id: user,
                symbol: "BTC/USDT".to_string(),
                timeframe: "1m".to_string(),
                action: "SELL".to_string(),
                price: dec!(50000),
                stop_loss: None,
                take_profit: None,
                confidence: 95.0,
                engine: "rt".to_string(),
                tick_at: now - Duration::seconds(90),
            }))
            .await;

        let bot = BotConfig::with_defaults(user, dec!(1000));
        let adapter = SourceAdapter::realtime_engine(store);
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_none());
    }

    fn tick(user_id: Uuid, confidence: f64, at: DateTime<Utc>) -> RealtimeSignalRow {
        RealtimeSignalRow {
            id: Uuid::new_v4(),
            user_id,
            symbol: "BTC/USDT".to_string(),
            timeframe: "1m".to_string(),
            action: "BUY".to_string(),
            price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            confidence,
            engine: "rt".to_string(),
            tick_at: at,
        }
    }

    #[tokio::test]
    async fn test_qualifying_signal_behind_many_weak_ones() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();

        let strong = tick(user, 95.0, now - Duration::seconds(50));
        let strong_id = strong.id.to_string();
        store.insert(RawSignal::Realtime(strong)).await;
        for i in 0..50 {
            let at = now - Duration::seconds(40) + Duration::milliseconds(i * 100);
            store.insert(RawSignal::Realtime(tick(user, 10.0, at))).await;
        }

        let bot = BotConfig::with_defaults(user, dec!(1000));
        let adapter = SourceAdapter::realtime_engine(store);
        let picked = adapter.fetch_latest(&bot, now).await.unwrap().unwrap();
        assert_eq!(picked.id, strong_id);
    }

    #[tokio::test]
    async fn test_legacy_score_compared_on_percent_scale() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();
        store
            .insert(RawSignal::Legacy(LegacySignalRow {
                id: 11,
                user_id: user,
                symbol: "BTC/USDT".to_string(),
                timeframe: "1H".to_string(),
                direction: "long".to_string(),
                entry: dec!(50000),
                sl: None,
                tp: None,
                score: 0.75,
                strategy: None,
                created_at: now - Duration::minutes(5),
            }))
            .await;

        let adapter = SourceAdapter::legacy_engine(store);
        let mut bot = BotConfig::with_defaults(user, dec!(1000));
        bot.timeframe = Some("1h".to_string());
        assert_eq!(adapter.fetch_latest(&bot, now).await.unwrap().unwrap().id, "11");

        bot.min_confidence = Some(80.0);
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_alert_consumed_once() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();
        let alert_id = Uuid::new_v4();
        store
            .insert(RawSignal::Webhook(WebhookAlertRow {
                id: alert_id,
                user_id: user,
                ticker: "ETH/USDT".to_string(),
                interval: Some("15m".to_string()),
                action: "BUY".to_string(),
                price: dec!(3000),
                stop_loss: None,
                take_profit: None,
                confidence: Some(85.0),
                alert_name: Some("breakout".to_string()),
                status: "pending".to_string(),
                received_at: now - Duration::minutes(5),
            }))
            .await;

        let bot = BotConfig::with_defaults(user, dec!(1000));
        let adapter = SourceAdapter::webhook_alert(store.clone());
        let first = adapter.fetch_latest(&bot, now).await.unwrap();
        assert_eq!(first.unwrap().id, alert_id.to_string());
        assert_eq!(store.alert_status(alert_id).await.as_deref(), Some(ALERT_PROCESSED));
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_symbol_allow_list_and_timeframe() {
        let store = Arc::new(InMemorySignalSourceStore::new());
        let user = Uuid::new_v4();
        let now = Utc::now();
        store.insert(RawSignal::Pattern(pattern(user, "1h", 90.0, now - Duration::minutes(1)))).await;

        let adapter = SourceAdapter::pattern_engine(store);
        let mut bot = BotConfig::with_defaults(user, dec!(1000));
        bot.allowed_symbols = Some(vec!["ETH/USDT".to_string()]);
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_none());

        bot.allowed_symbols = None;
        bot.timeframe = Some("4h".to_string());
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_none());

        bot.timeframe = Some("1h".to_string());
        assert!(adapter.fetch_latest(&bot, now).await.unwrap().is_some());
    }
}
