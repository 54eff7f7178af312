// Worker tick: route every active bot, process the survivors one by one

use crate::pipeline::{ProcessOutcome, SignalProcessor};
use chrono::{DateTime, Utc};
use common::{BotConfigLoader, Direction};
use serde::{Deserialize, Serialize};
use signal_routing::{RoutedSignal, SignalRouter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub processed: u32,
    pub executed: u32,
    pub filtered: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl TickReport {
    fn record(&mut self, outcome: ProcessOutcome) {
        self.processed += 1;
        match outcome {
            ProcessOutcome::Executed { .. } => self.executed += 1,
            ProcessOutcome::Filtered { .. } => self.filtered += 1,
            ProcessOutcome::Failed { decision_id, error } => {
                self.failed += 1;
                match decision_id {
                    Some(id) => self.errors.push(format!("{}: {}", id, error)),
                    None => self.errors.push(error),
                }
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum TickError {
    #[error("a tick is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

pub struct Scheduler {
    configs: BotConfigLoader,
    router: SignalRouter,
    processor: SignalProcessor,
    guard: Mutex<()>,
}

impl Scheduler {
    pub fn new(configs: BotConfigLoader, router: SignalRouter, processor: SignalProcessor) -> Self {
        Self {
            configs,
            router,
            processor,
            guard: Mutex::new(()),
        }
    }

    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        self.run_tick_at(Utc::now()).await
    }

    /// One tick at a fixed clock; overlapping calls fail fast
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let Ok(_running) = self.guard.try_lock() else {
            warn!("Tick requested while another is running");
            return Err(TickError::AlreadyRunning);
        };

        let user_ids = self.configs.active_user_ids().await?;
        debug!(bots = user_ids.len(), "Starting tick");

        let mut report = TickReport::default();
        let mut batch: Vec<RoutedSignal> = Vec::new();
        let mut seen: HashSet<(Uuid, String, Direction)> = HashSet::new();

        for user_id in user_ids {
            match self.router.route(user_id, now).await {
                Ok(Some(routed)) => {
                    let key = (
                        user_id,
                        routed.signal.symbol.to_ascii_uppercase(),
                        routed.signal.direction(),
                    );
                    if seen.insert(key) {
                        batch.push(routed);
                    } else {
                        debug!(user_id = %user_id, symbol = %routed.signal.symbol, "Duplicate signal in tick, dropped");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Signal routing failed");
                    report.failed += 1;
                    report.errors.push(format!("{}: {:#}", user_id, e));
                }
            }
        }

        for routed in &batch {
            let outcome = self.processor.process(routed, now).await;
            report.record(outcome);
        }

        info!(
            processed = report.processed,
            executed = report.executed,
            filtered = report.filtered,
            failed = report.failed,
            "Tick finished"
        );
        Ok(report)
    }

    /// Tick on a fixed interval until the task is dropped
    pub async fn run_forever(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.run_tick().await {
                Ok(_) | Err(TickError::AlreadyRunning) => {}
                Err(TickError::Infra(e)) => error!(error = %e, "Scheduled tick failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::StaticEntitlements;
    use anyhow::Result;
    use chrono::Duration as ChronoDuration;
    use common::{BotConfigRow, BotConfigStore, InMemoryBotConfigStore, SignalSource};
    use decision_ledger::InMemoryLedger;
    use execution::{PaperTradeExecutor, StaticPlatformMonitor};
    use portfolio_risk::{InMemoryTradeHistory, RiskConfig, RiskEvaluator};
    use rust_decimal_macros::dec;
    use signal_routing::{
        CandidateQuery, InMemorySignalSourceStore, LegacySignalRow, RawSignal, SignalSourceStore,
    };

    #[test]
    fn test_report_counts_outcomes() {
        let mut report = TickReport::default();
        let id = Uuid::new_v4();
        report.record(ProcessOutcome::Executed {
            decision_id: id,
            trade_id: Some("t-1".to_string()),
        });
        report.record(ProcessOutcome::Filtered {
            decision_id: id,
            code: "LOW_CONFIDENCE".to_string(),
        });
        report.record(ProcessOutcome::Failed {
            decision_id: None,
            error: "ledger down".to_string(),
        });

        assert_eq!(report.processed, 3);
        assert_eq!(report.executed, 1);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, vec!["ledger down".to_string()]);
    }

    /// Lists every active user twice, as a racing settings sync might
    struct DoubledConfigStore(InMemoryBotConfigStore);

    #[async_trait::async_trait]
    impl BotConfigStore for DoubledConfigStore {
        async fn load(&self, user_id: Uuid) -> Result<Option<BotConfigRow>> {
            self.0.load(user_id).await
        }

        async fn active_user_ids(&self) -> Result<Vec<Uuid>> {
            let ids = self.0.active_user_ids().await?;
            Ok(ids.iter().chain(ids.iter()).copied().collect())
        }
    }

    struct UnavailableSourceStore;

    #[async_trait::async_trait]
    impl SignalSourceStore for UnavailableSourceStore {
        async fn candidates(&self, _source: SignalSource, _query: &CandidateQuery) -> Result<Vec<RawSignal>> {
            anyhow::bail!("signal database unavailable")
        }

        async fn mark_alert_processed(&self, _alert_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    fn scheduler_over(configs: Arc<dyn BotConfigStore>, signals: Arc<dyn SignalSourceStore>) -> Scheduler {
        let configs = BotConfigLoader::new(configs);
        let trades = Arc::new(InMemoryTradeHistory::new());
        let processor = SignalProcessor::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(RiskEvaluator::new(trades.clone(), RiskConfig::default())),
            trades,
            Arc::new(StaticPlatformMonitor::new()),
            Arc::new(StaticEntitlements::allow_all()),
            Arc::new(PaperTradeExecutor::new()),
        );
        let router = SignalRouter::with_store(configs.clone(), signals);
        Scheduler::new(configs, router, processor)
    }

    async fn legacy_bot(configs: &InMemoryBotConfigStore) -> Uuid {
        let user = Uuid::new_v4();
        configs
            .upsert(BotConfigRow {
                user_id: user,
                is_active: Some(true),
                auto_trading_mode: Some("full_auto".to_string()),
                total_capital: Some(dec!(1000)),
                signal_source: Some("legacy".to_string()),
                ..Default::default()
            })
            .await;
        user
    }

    #[tokio::test]
    async fn test_same_user_symbol_and_direction_processed_once() {
        let configs = InMemoryBotConfigStore::new();
        let user = legacy_bot(&configs).await;
        let now = Utc::now();
        let signals = Arc::new(InMemorySignalSourceStore::new());
        signals
            .insert(RawSignal::Legacy(LegacySignalRow {
                id: 11,
                user_id: user,
                symbol: "BTC/USDT".to_string(),
                timeframe: "1h".to_string(),
                direction: "long".to_string(),
                entry: dec!(50000),
                sl: None,
                tp: None,
                score: 0.9,
                strategy: Some("ma_cross".to_string()),
                created_at: now - ChronoDuration::minutes(5),
            }))
            .await;

        let scheduler = scheduler_over(Arc::new(DoubledConfigStore(configs)), signals);
        let report = scheduler.run_tick_at(now).await.unwrap();
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn test_routing_error_counts_as_failed() {
        let configs = InMemoryBotConfigStore::new();
        let user = legacy_bot(&configs).await;

        let scheduler = scheduler_over(Arc::new(configs), Arc::new(UnavailableSourceStore));
        let report = scheduler.run_tick_at(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with(&user.to_string()));
        assert!(report.errors[0].contains("signal database unavailable"));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_refused() {
        let scheduler = scheduler_over(
            Arc::new(InMemoryBotConfigStore::new()),
            Arc::new(InMemorySignalSourceStore::new()),
        );

        let held = scheduler.guard.try_lock().unwrap();
        assert!(matches!(scheduler.run_tick().await, Err(TickError::AlreadyRunning)));
        drop(held);

        assert_eq!(scheduler.run_tick().await.unwrap(), TickReport::default());
    }
}
