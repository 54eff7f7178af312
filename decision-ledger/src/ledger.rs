//! Ledger storage trait and the in-memory backend

use crate::record::{DecisionPatch, DecisionRecord, DecisionStatus, LedgerStep, LogEntry, NewDecision};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("decision {id} is already {status}")]
    TerminalState { id: Uuid, status: DecisionStatus },

    #[error("decision {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Trait for decision ledger backends.
///
/// Records move from `pending` to exactly one terminal status; logs are insert-only.
#[async_trait::async_trait]
pub trait DecisionLedger: Send + Sync {
    async fn create_record(&self, decision: NewDecision) -> LedgerResult<DecisionRecord>;

    /// Fails with `TerminalState` once the record left `pending`
    async fn update_record(&self, id: Uuid, patch: DecisionPatch) -> LedgerResult<DecisionRecord>;

    async fn append_log(
        &self,
        id: Uuid,
        step: LedgerStep,
        message: &str,
        data: serde_json::Value,
    ) -> LedgerResult<()>;

    async fn get_record(&self, id: Uuid) -> LedgerResult<Option<DecisionRecord>>;

    /// Log entries in append order
    async fn logs(&self, id: Uuid) -> LedgerResult<Vec<LogEntry>>;
}

/// In-memory ledger (for testing and development)
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<Uuid, DecisionRecord>>,
    logs: RwLock<HashMap<Uuid, Vec<LogEntry>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first
    pub async fn records(&self) -> Vec<DecisionRecord> {
        let mut records: Vec<DecisionRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait::async_trait]
impl DecisionLedger for InMemoryLedger {
    async fn create_record(&self, decision: NewDecision) -> LedgerResult<DecisionRecord> {
        let record = decision.into_record(Utc::now());
        self.records.write().await.insert(record.id, record.clone());
        debug!(decision_id = %record.id, signal_id = %record.signal_id, "Decision record created");
        Ok(record)
    }

    async fn update_record(&self, id: Uuid, patch: DecisionPatch) -> LedgerResult<DecisionRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if record.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                id,
                status: record.status,
            });
        }
        patch.apply(record, Utc::now());
        Ok(record.clone())
    }

    async fn append_log(
        &self,
        id: Uuid,
        step: LedgerStep,
        message: &str,
        data: serde_json::Value,
    ) -> LedgerResult<()> {
        if !self.records.read().await.contains_key(&id) {
            return Err(LedgerError::NotFound(id));
        }
        let mut logs = self.logs.write().await;
        let entries = logs.entry(id).or_default();
        entries.push(LogEntry {
            decision_id: id,
            sequence: entries.len() as i64 + 1,
            step,
            message: message.to_string(),
            data,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> LedgerResult<Option<DecisionRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn logs(&self, id: Uuid) -> LedgerResult<Vec<LogEntry>> {
        Ok(self.logs.read().await.get(&id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Decimal, SignalAction, SignalSource, UnifiedSignal};
    use serde_json::json;

    fn decision() -> NewDecision {
        let signal = UnifiedSignal {
            id: "42".to_string(),
            user_id: Uuid::nil(),
            symbol: "BTC/USDT".to_string(),
            timeframe: "1h".to_string(),
            action: SignalAction::Buy,
            entry_price: Decimal::from(50000),
            stop_loss: None,
            take_profit: None,
            confidence: 80.0,
            source: SignalSource::LegacyEngine,
            strategy: "ma_cross".to_string(),
            generated_at: Utc::now(),
            metadata: serde_json::Value::Null,
        };
        NewDecision::from_signal(Uuid::nil(), &signal)
    }

    #[tokio::test]
    async fn test_record_starts_pending() {
        let ledger = InMemoryLedger::new();
        let record = ledger.create_record(decision()).await.unwrap();
        assert_eq!(record.status, DecisionStatus::Pending);
        assert_eq!(record.metadata["signal"]["id"], "42");
    }

    #[tokio::test]
    async fn test_terminal_record_rejects_updates() {
        let ledger = InMemoryLedger::new();
        let record = ledger.create_record(decision()).await.unwrap();

        ledger
            .update_record(record.id, DecisionPatch::accepted(Some("T1".to_string())))
            .await
            .unwrap();

        let second = ledger
            .update_record(record.id, DecisionPatch::rejected("LOW_CONFIDENCE", "late"))
            .await;
        assert!(matches!(second, Err(LedgerError::TerminalState { status: DecisionStatus::Accepted, .. })));

        let stored = ledger.get_record(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Accepted);
        assert_eq!(stored.trade_id.as_deref(), Some("T1"));
        assert_eq!(stored.reason_code, None);
    }

    #[tokio::test]
    async fn test_pending_record_accepts_metadata_patches() {
        let ledger = InMemoryLedger::new();
        let record = ledger.create_record(decision()).await.unwrap();

        let updated = ledger
            .update_record(record.id, DecisionPatch::metadata(json!({"risk": {"allowed": true}})))
            .await
            .unwrap();
        assert_eq!(updated.status, DecisionStatus::Pending);
        assert_eq!(updated.metadata["risk"]["allowed"], true);
        assert_eq!(updated.metadata["signal"]["symbol"], "BTC/USDT");
    }

    #[tokio::test]
    async fn test_logs_keep_append_order() {
        let ledger = InMemoryLedger::new();
        let record = ledger.create_record(decision()).await.unwrap();

        ledger
            .append_log(record.id, LedgerStep::SignalReceived, "received", json!({}))
            .await
            .unwrap();
        ledger
            .append_log(record.id, LedgerStep::FiltersApplied, "passed", json!({"passed": true}))
            .await
            .unwrap();

        let logs = ledger.logs(record.id).await.unwrap();
        let steps: Vec<LedgerStep> = logs.iter().map(|l| l.step).collect();
        assert_eq!(steps, vec![LedgerStep::SignalReceived, LedgerStep::FiltersApplied]);
        assert_eq!(logs[1].sequence, 2);
    }

    #[tokio::test]
    async fn test_unknown_record() {
        let ledger = InMemoryLedger::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            ledger.update_record(missing, DecisionPatch::default()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(ledger
            .append_log(missing, LedgerStep::Error, "boom", json!(null))
            .await
            .is_err());
    }
}
