// Signal Source Storage
// Read access to the tables each upstream engine writes to

use super::sources::{
    LegacySignalRow, PatternSignalRow, RawSignal, RealtimeSignalRow, WebhookAlertRow,
    UNSCORED_ALERT_CONFIDENCE,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::SignalSource;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle status of a webhook alert that is waiting to be picked up
pub const ALERT_PENDING: &str = "pending";
/// Lifecycle status set once the router hands an alert to the pipeline
pub const ALERT_PROCESSED: &str = "processed";

/// Rows fetched per source before in-process filtering
const CANDIDATE_LIMIT: i64 = 50;

/// Filters pushed down to storage ahead of the row limit; adapters re-check
/// them and apply the per-timeframe freshness window
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub user_id: Uuid,
    /// Oldest generation time worth fetching
    pub since: DateTime<Utc>,
    pub symbols: Option<Vec<String>>,
    pub timeframe: Option<String>,
    /// On the 0..100 scale, after source normalization
    pub min_confidence: f64,
}

impl CandidateQuery {
    fn matches(
        &self,
        user_id: Uuid,
        symbol: &str,
        timeframe: &str,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> bool {
        user_id == self.user_id
            && at >= self.since
            && confidence >= self.min_confidence
            && self
                .symbols
                .as_ref()
                .map_or(true, |s| s.iter().any(|x| x.eq_ignore_ascii_case(symbol.trim())))
            && self
                .timeframe
                .as_ref()
                .map_or(true, |tf| tf.eq_ignore_ascii_case(timeframe))
    }
}

/// Trait for signal source backends
#[async_trait::async_trait]
pub trait SignalSourceStore: Send + Sync {
    /// Recent candidates for one source, newest first
    async fn candidates(&self, source: SignalSource, query: &CandidateQuery) -> Result<Vec<RawSignal>>;

    /// Move a webhook alert out of the pending state
    async fn mark_alert_processed(&self, alert_id: Uuid) -> Result<()>;
}

/// In-memory source storage (for testing and development)
pub struct InMemorySignalSourceStore {
    rows: tokio::sync::RwLock<Vec<RawSignal>>,
}

impl InMemorySignalSourceStore {
    pub fn new() -> Self {
        Self {
            rows: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    pub async fn insert(&self, row: RawSignal) {
        self.rows.write().await.push(row);
    }

    /// Current status of a webhook alert, if present
    pub async fn alert_status(&self, alert_id: Uuid) -> Option<String> {
        self.rows.read().await.iter().find_map(|r| match r {
            RawSignal::Webhook(alert) if alert.id == alert_id => Some(alert.status.clone()),
            _ => None,
        })
    }
}

impl Default for InMemorySignalSourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SignalSourceStore for InMemorySignalSourceStore {
    async fn candidates(&self, source: SignalSource, query: &CandidateQuery) -> Result<Vec<RawSignal>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<(DateTime<Utc>, RawSignal)> = rows
            .iter()
            .filter(|r| r.source() == source)
            .filter_map(|r| {
                let keep = match r {
                    RawSignal::Pattern(p) => query.matches(
                        p.user_id,
                        &p.symbol,
                        &p.timeframe,
                        p.confidence,
                        p.detected_at,
                    ),
                    RawSignal::Realtime(p) => {
                        query.matches(p.user_id, &p.symbol, &p.timeframe, p.confidence, p.tick_at)
                    }
                    RawSignal::Webhook(p) => {
                        p.status == ALERT_PENDING
                            && query.matches(
                                p.user_id,
                                &p.ticker,
                                p.interval.as_deref().unwrap_or_default(),
                                p.confidence.unwrap_or(UNSCORED_ALERT_CONFIDENCE),
                                p.received_at,
                            )
                    }
                    RawSignal::Legacy(p) => query.matches(
                        p.user_id,
                        &p.symbol,
                        &p.timeframe,
                        p.score * 100.0,
                        p.created_at,
                    ),
                };
                keep.then(|| (generated_at(r), r.clone()))
            })
            .collect();

        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching
            .into_iter()
            .take(CANDIDATE_LIMIT as usize)
            .map(|(_, r)| r)
            .collect())
    }

    async fn mark_alert_processed(&self, alert_id: Uuid) -> Result<()> {
        let mut rows = self.rows.write().await;
        for row in rows.iter_mut() {
            if let RawSignal::Webhook(alert) = row {
                if alert.id == alert_id {
                    alert.status = ALERT_PROCESSED.to_string();
                }
            }
        }
        Ok(())
    }
}

fn generated_at(raw: &RawSignal) -> DateTime<Utc> {
    match raw {
        RawSignal::Pattern(p) => p.detected_at,
        RawSignal::Realtime(p) => p.tick_at,
        RawSignal::Webhook(p) => p.received_at,
        RawSignal::Legacy(p) => p.created_at,
    }
}

/// Postgres-backed source storage
pub struct PgSignalSourceStore {
    db_pool: Arc<PgPool>,
}

impl PgSignalSourceStore {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait::async_trait]
impl SignalSourceStore for PgSignalSourceStore {
    async fn candidates(&self, source: SignalSource, query: &CandidateQuery) -> Result<Vec<RawSignal>> {
        let pool = self.db_pool.as_ref();
        let rows = match source {
            SignalSource::PatternEngine => sqlx::query_as::<_, PatternSignalRow>(
                r#"
                SELECT id, user_id, symbol, timeframe, signal_type, entry_price,
                       stop_loss, take_profit, confidence, pattern_name, detected_at
                FROM pattern_signals
                WHERE user_id = $1
                  AND detected_at >= $2
                  AND ($3::text[] IS NULL OR UPPER(symbol) = ANY($3))
                  AND ($4::text IS NULL OR LOWER(timeframe) = LOWER($4))
                  AND confidence >= $6
                ORDER BY detected_at DESC
                LIMIT $5
                "#,
            )
            .bind(query.user_id)
            .bind(query.since)
            .bind(&query.symbols)
            .bind(&query.timeframe)
            .bind(CANDIDATE_LIMIT)
            .bind(query.min_confidence)
            .fetch_all(pool)
            .await
            .context("Failed to fetch pattern signals")?
            .into_iter()
            .map(RawSignal::Pattern)
            .collect(),

            SignalSource::RealtimeEngine => sqlx::query_as::<_, RealtimeSignalRow>(
                r#"
                SELECT id, user_id, symbol, timeframe, action, price,
                       stop_loss, take_profit, confidence, engine, tick_at
                FROM realtime_signals
                WHERE user_id = $1
                  AND tick_at >= $2
                  AND ($3::text[] IS NULL OR UPPER(symbol) = ANY($3))
                  AND ($4::text IS NULL OR LOWER(timeframe) = LOWER($4))
                  AND confidence >= $6
                ORDER BY tick_at DESC
                LIMIT $5
                "#,
            )
            .bind(query.user_id)
            .bind(query.since)
            .bind(&query.symbols)
            .bind(&query.timeframe)
            .bind(CANDIDATE_LIMIT)
            .bind(query.min_confidence)
            .fetch_all(pool)
            .await
            .context("Failed to fetch realtime signals")?
            .into_iter()
            .map(RawSignal::Realtime)
            .collect(),

            SignalSource::WebhookAlert => sqlx::query_as::<_, WebhookAlertRow>(
                r#"
                SELECT id, user_id, ticker, interval, action, price,
                       stop_loss, take_profit, confidence, alert_name, status, received_at
                FROM webhook_alerts
                WHERE user_id = $1
                  AND received_at >= $2
                  AND status = $6
                  AND ($3::text[] IS NULL OR UPPER(ticker) = ANY($3))
                  AND ($4::text IS NULL OR LOWER(interval) = LOWER($4))
                  AND COALESCE(confidence, $8) >= $7
                ORDER BY received_at DESC
                LIMIT $5
                "#,
            )
            .bind(query.user_id)
            .bind(query.since)
            .bind(&query.symbols)
            .bind(&query.timeframe)
            .bind(CANDIDATE_LIMIT)
            .bind(ALERT_PENDING)
            .bind(query.min_confidence)
            .bind(UNSCORED_ALERT_CONFIDENCE)
            .fetch_all(pool)
            .await
            .context("Failed to fetch webhook alerts")?
            .into_iter()
            .map(RawSignal::Webhook)
            .collect(),

            SignalSource::LegacyEngine => sqlx::query_as::<_, LegacySignalRow>(
                r#"
                SELECT id, user_id, symbol, timeframe, direction, entry,
                       sl, tp, score, strategy, created_at
                FROM legacy_signals
                WHERE user_id = $1
                  AND created_at >= $2
                  AND ($3::text[] IS NULL OR UPPER(symbol) = ANY($3))
                  AND ($4::text IS NULL OR LOWER(timeframe) = LOWER($4))
                  AND score * 100 >= $6
                ORDER BY created_at DESC
                LIMIT $5
                "#,
            )
            .bind(query.user_id)
            .bind(query.since)
            .bind(&query.symbols)
            .bind(&query.timeframe)
            .bind(CANDIDATE_LIMIT)
            .bind(query.min_confidence)
            .fetch_all(pool)
            .await
            .context("Failed to fetch legacy signals")?
            .into_iter()
            .map(RawSignal::Legacy)
            .collect(),
        };

        Ok(rows)
    }

    async fn mark_alert_processed(&self, alert_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_alerts
            SET status = $2, processed_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(alert_id)
        .bind(ALERT_PROCESSED)
        .bind(ALERT_PENDING)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to mark webhook alert processed")?;

        Ok(())
    }
}
