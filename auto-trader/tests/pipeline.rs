use auto_trader::{
    Allocation, Capability, CopyTrader, EntitlementChecker, FollowerSubscription, InMemoryFollowerStore,
    ProcessOutcome, Scheduler, SignalProcessor, StaticEntitlements, SuccessForecaster, EXECUTION_FAILED,
    EXECUTION_SKIPPED, PROCESSING_ERROR,
};
use chrono::{DateTime, Duration, Utc};
use common::{BotConfigLoader, BotConfigRow, InMemoryBotConfigStore, SignalAction, SignalSource, UnifiedSignal};
use decision_ledger::{DecisionLedger, DecisionStatus, InMemoryLedger, LedgerStep};
use execution::{ExecutionRequest, ExecutionResponse, ExecutorError, StaticPlatformMonitor, TradeExecutor};
use portfolio_risk::{InMemoryTradeHistory, KillSwitch, RiskConfig, RiskEvaluator};
use rust_decimal_macros::dec;
use signal_routing::{InMemorySignalSourceStore, PatternSignalRow, RawSignal, RoutedSignal, SignalRouter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Records every request and fills it with a fixed trade id
struct RecordingExecutor {
    trade_id: String,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl RecordingExecutor {
    fn new(trade_id: &str) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    async fn calls(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait::async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, ExecutorError> {
        self.requests.lock().await.push(request.clone());
        Ok(ExecutionResponse {
            success: true,
            trade_id: Some(self.trade_id.clone()),
            error_message: None,
            execution_detail: None,
            status: Some("filled".to_string()),
        })
    }
}

/// Answers every request with the same scripted result
struct ScriptedExecutor {
    result: fn() -> Result<ExecutionResponse, ExecutorError>,
}

#[async_trait::async_trait]
impl TradeExecutor for ScriptedExecutor {
    async fn execute(&self, _request: &ExecutionRequest) -> Result<ExecutionResponse, ExecutorError> {
        (self.result)()
    }
}

struct UnreachableEntitlements;

#[async_trait::async_trait]
impl EntitlementChecker for UnreachableEntitlements {
    async fn has_capability(&self, _user_id: Uuid, _capability: Capability) -> anyhow::Result<bool> {
        anyhow::bail!("billing service timed out")
    }
}

struct FailingForecaster {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SuccessForecaster for FailingForecaster {
    async fn forecast(&self, _signal: &UnifiedSignal) -> anyhow::Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("model offline")
    }
}

struct Harness {
    configs: Arc<InMemoryBotConfigStore>,
    signals: Arc<InMemorySignalSourceStore>,
    trades: Arc<InMemoryTradeHistory>,
    ledger: Arc<InMemoryLedger>,
    executor: Arc<RecordingExecutor>,
}

impl Harness {
    fn new() -> Self {
        Self {
            configs: Arc::new(InMemoryBotConfigStore::new()),
            signals: Arc::new(InMemorySignalSourceStore::new()),
            trades: Arc::new(InMemoryTradeHistory::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            executor: Arc::new(RecordingExecutor::new("T1")),
        }
    }

    fn loader(&self) -> BotConfigLoader {
        BotConfigLoader::new(self.configs.clone())
    }

    fn risk(&self) -> Arc<RiskEvaluator> {
        Arc::new(RiskEvaluator::new(self.trades.clone(), RiskConfig::default()))
    }

    fn processor(&self) -> SignalProcessor {
        self.processor_with(self.executor.clone(), Arc::new(StaticEntitlements::allow_all()))
    }

    fn processor_with(
        &self,
        executor: Arc<dyn TradeExecutor>,
        entitlements: Arc<dyn EntitlementChecker>,
    ) -> SignalProcessor {
        SignalProcessor::new(
            self.ledger.clone(),
            self.risk(),
            self.trades.clone(),
            Arc::new(StaticPlatformMonitor::new()),
            entitlements,
            executor,
        )
    }

    fn scheduler(&self) -> Scheduler {
        let router = SignalRouter::with_store(self.loader(), self.signals.clone());
        Scheduler::new(self.loader(), router, self.processor())
    }

    async fn add_bot(&self, user_id: Uuid, active: bool, mode: &str) {
        self.configs
            .upsert(BotConfigRow {
                user_id,
                is_active: Some(active),
                auto_trading_mode: Some(mode.to_string()),
                total_capital: Some(dec!(1000)),
                signal_source: Some("pattern_engine".to_string()),
                min_confidence: Some(70.0),
                allowed_directions: Some(vec!["long".to_string(), "short".to_string()]),
                ..Default::default()
            })
            .await;
    }

    async fn add_btc_buy(&self, user_id: Uuid, confidence: f64, now: DateTime<Utc>) {
        self.signals
            .insert(RawSignal::Pattern(PatternSignalRow {
                id: Uuid::new_v4(),
                user_id,
                symbol: "BTC/USDT".to_string(),
                timeframe: "1h".to_string(),
                signal_type: "BUY".to_string(),
                entry_price: dec!(50000),
                stop_loss: None,
                take_profit: None,
                confidence,
                pattern_name: "bull_flag".to_string(),
                detected_at: now - Duration::minutes(1),
            }))
            .await;
    }

    async fn routed(&self, user_id: Uuid, confidence: f64, now: DateTime<Utc>) -> RoutedSignal {
        let bot = self.loader().load(user_id).await.unwrap().unwrap();
        let signal = UnifiedSignal {
            id: Uuid::new_v4().to_string(),
            user_id,
            symbol: "BTC/USDT".to_string(),
            timeframe: "1h".to_string(),
            action: SignalAction::Buy,
            entry_price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            confidence,
            source: SignalSource::PatternEngine,
            strategy: "bull_flag".to_string(),
            generated_at: now - Duration::minutes(1),
            metadata: serde_json::json!({}),
        };
        RoutedSignal { bot, signal }
    }
}

fn steps(logs: &[decision_ledger::LogEntry]) -> Vec<LedgerStep> {
    logs.iter().map(|l| l.step).collect()
}

#[tokio::test]
async fn scenario_a_full_auto_signal_is_executed() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "full_auto").await;
    h.add_btc_buy(user, 80.0, now).await;

    let report = h.scheduler().run_tick_at(now).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(h.executor.calls().await, 1);

    let records = h.ledger.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, DecisionStatus::Accepted);
    assert_eq!(record.trade_id.as_deref(), Some("T1"));

    let logs = h.ledger.logs(record.id).await.unwrap();
    let responses = logs.iter().filter(|l| l.step == LedgerStep::ExchangeResponse).count();
    assert_eq!(responses, 1);
    assert_eq!(
        steps(&logs),
        vec![
            LedgerStep::SignalReceived,
            LedgerStep::FiltersApplied,
            LedgerStep::LimitsChecked,
            LedgerStep::AcceptedForExecution,
            LedgerStep::ExecuteCalled,
            LedgerStep::ExchangeResponse,
        ]
    );

    let request = &h.executor.requests.lock().await[0];
    assert_eq!(request.plan.symbol, "BTC/USDT");
    assert_eq!(request.idempotency_key, record.signal_id);
}

#[tokio::test]
async fn scenario_b_inactive_bot_leaves_no_record() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, false, "full_auto").await;
    h.add_btc_buy(user, 80.0, now).await;

    let report = h.scheduler().run_tick_at(now).await.unwrap();
    assert_eq!(report.processed, 0);
    assert!(h.ledger.records().await.is_empty());
    assert_eq!(h.executor.calls().await, 0);
}

#[tokio::test]
async fn scenario_c_low_confidence_is_rejected() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "full_auto").await;

    let routed = h.routed(user, 50.0, now).await;
    let outcome = h.processor().process(&routed, now).await;
    assert!(matches!(&outcome, ProcessOutcome::Filtered { code, .. } if code == "LOW_CONFIDENCE"));

    let record = &h.ledger.records().await[0];
    assert_eq!(record.status, DecisionStatus::Rejected);
    assert_eq!(record.reason_code.as_deref(), Some("LOW_CONFIDENCE"));
    assert_eq!(h.executor.calls().await, 0);

    let logs = h.ledger.logs(record.id).await.unwrap();
    assert_eq!(
        steps(&logs),
        vec![LedgerStep::SignalReceived, LedgerStep::FiltersApplied, LedgerStep::Rejected]
    );
}

#[tokio::test]
async fn scenario_d_kill_switch_stops_before_payload() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "full_auto").await;
    h.trades
        .add_kill_switch(KillSwitch {
            id: Uuid::new_v4(),
            user_id: user,
            platform_id: None,
            symbol: None,
            reason: "manual stop".to_string(),
            is_active: true,
            expires_at: None,
            created_at: now - Duration::hours(1),
        })
        .await;

    let routed = h.routed(user, 80.0, now).await;
    let outcome = h.processor().process(&routed, now).await;
    assert!(matches!(&outcome, ProcessOutcome::Filtered { code, .. } if code == "KILL_SWITCH_ACTIVE"));
    assert_eq!(h.executor.calls().await, 0);

    let record = &h.ledger.records().await[0];
    assert_eq!(record.status, DecisionStatus::Rejected);
    let logs = h.ledger.logs(record.id).await.unwrap();
    assert!(logs.iter().all(|l| l.step != LedgerStep::AcceptedForExecution));
}

#[tokio::test]
async fn semi_auto_bot_never_reaches_executor() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "semi_auto").await;

    let routed = h.routed(user, 90.0, now).await;
    let outcome = h.processor().process(&routed, now).await;
    assert!(matches!(&outcome, ProcessOutcome::Filtered { code, .. } if code == EXECUTION_SKIPPED));
    assert_eq!(h.executor.calls().await, 0);

    let record = &h.ledger.records().await[0];
    assert_eq!(record.status, DecisionStatus::Rejected);
    assert_eq!(record.reason_code.as_deref(), Some(EXECUTION_SKIPPED));
}

#[tokio::test]
async fn forecast_failure_does_not_block_execution() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "full_auto").await;

    let forecaster = Arc::new(FailingForecaster {
        calls: AtomicUsize::new(0),
    });
    let processor = h.processor().with_forecaster(forecaster.clone());
    let routed = h.routed(user, 85.0, now).await;

    let outcome = processor.process(&routed, now).await;
    assert!(matches!(outcome, ProcessOutcome::Executed { .. }));
    assert_eq!(forecaster.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.executor.calls().await, 1);
}

#[tokio::test]
async fn master_fill_is_copied_to_followers() {
    let h = Harness::new();
    let master = Uuid::new_v4();
    let follower = Uuid::new_v4();
    let strategy = Uuid::new_v4();
    let now = Utc::now();

    h.configs
        .upsert(BotConfigRow {
            user_id: master,
            is_active: Some(true),
            auto_trading_mode: Some("full_auto".to_string()),
            total_capital: Some(dec!(1000)),
            copy_strategy_id: Some(strategy),
            ..Default::default()
        })
        .await;
    h.add_bot(follower, true, "full_auto").await;

    let followers = Arc::new(InMemoryFollowerStore::new());
    followers
        .subscribe(FollowerSubscription {
            follower_id: follower,
            strategy_id: strategy,
            allocation: Allocation::Fixed(dec!(150)),
            platform_id: None,
        })
        .await;
    let copier = CopyTrader::new(followers, h.loader(), h.risk(), h.executor.clone(), h.ledger.clone());
    let processor = h.processor().with_copy_trader(Arc::new(copier));

    let routed = h.routed(master, 85.0, now).await;
    let outcome = processor.process(&routed, now).await;
    assert!(matches!(outcome, ProcessOutcome::Executed { .. }));

    let requests = h.executor.requests.lock().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].user_id, follower);
    assert_eq!(requests[1].plan.position_size, dec!(150));
    assert_eq!(requests[1].idempotency_key, format!("{}:{}", routed.signal.id, follower));

    let copies: Vec<_> = h
        .ledger
        .records()
        .await
        .into_iter()
        .filter(|r| r.user_id == follower)
        .collect();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].status, DecisionStatus::Accepted);
    assert_eq!(copies[0].master_trade_id.as_deref(), Some("T1"));
}

fn rejected_by_exchange() -> Result<ExecutionResponse, ExecutorError> {
    Ok(ExecutionResponse {
        success: false,
        trade_id: None,
        error_message: Some("insufficient margin".to_string()),
        execution_detail: None,
        status: Some("rejected".to_string()),
    })
}

fn left_pending() -> Result<ExecutionResponse, ExecutorError> {
    Ok(ExecutionResponse {
        success: true,
        trade_id: Some("T2".to_string()),
        error_message: None,
        execution_detail: None,
        status: Some("pending".to_string()),
    })
}

fn gateway_down() -> Result<ExecutionResponse, ExecutorError> {
    Err(ExecutorError::Rejected {
        status: 503,
        body: "upstream unavailable".to_string(),
    })
}

#[tokio::test]
async fn executor_failures_end_in_a_single_error_entry() {
    let cases: [(fn() -> Result<ExecutionResponse, ExecutorError>, &str); 3] = [
        (rejected_by_exchange, "insufficient margin"),
        (left_pending, "pending"),
        (gateway_down, "upstream unavailable"),
    ];

    for (result, expected) in cases {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        h.add_bot(user, true, "full_auto").await;

        let processor = h.processor_with(
            Arc::new(ScriptedExecutor { result }),
            Arc::new(StaticEntitlements::allow_all()),
        );
        let routed = h.routed(user, 85.0, now).await;
        let outcome = processor.process(&routed, now).await;
        assert!(
            matches!(&outcome, ProcessOutcome::Failed { decision_id: Some(_), error } if error.contains(expected)),
            "unexpected outcome {:?}",
            outcome
        );

        let record = &h.ledger.records().await[0];
        assert_eq!(record.status, DecisionStatus::Error);
        assert_eq!(record.reason_code.as_deref(), Some(EXECUTION_FAILED));
        assert!(record.trade_id.is_none());

        let logs = h.ledger.logs(record.id).await.unwrap();
        let errors = logs.iter().filter(|l| l.step == LedgerStep::Error).count();
        assert_eq!(errors, 1);
        assert_eq!(
            steps(&logs)[logs.len() - 2..],
            [LedgerStep::ExecuteCalled, LedgerStep::Error]
        );
    }
}

#[tokio::test]
async fn entitlement_outage_is_recorded_as_processing_error() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.add_bot(user, true, "full_auto").await;

    let processor = h.processor_with(h.executor.clone(), Arc::new(UnreachableEntitlements));
    let routed = h.routed(user, 85.0, now).await;
    let outcome = processor.process(&routed, now).await;
    let record = &h.ledger.records().await[0];
    assert!(matches!(
        &outcome,
        ProcessOutcome::Failed { decision_id: Some(id), error } if *id == record.id && error.contains("billing service")
    ));
    assert_eq!(h.executor.calls().await, 0);

    assert_eq!(record.status, DecisionStatus::Error);
    assert_eq!(record.reason_code.as_deref(), Some(PROCESSING_ERROR));
    let logs = h.ledger.logs(record.id).await.unwrap();
    assert_eq!(steps(&logs), vec![LedgerStep::SignalReceived, LedgerStep::Error]);
}
