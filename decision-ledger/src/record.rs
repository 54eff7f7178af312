//! Decision records, their status machine and log entries

use chrono::{DateTime, Utc};
use common::{Direction, ParseEnumError, SignalSource, UnifiedSignal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of one signal-processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Accepted,
    Rejected,
    Error,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Accepted => "accepted",
            DecisionStatus::Rejected => "rejected",
            DecisionStatus::Error => "error",
        }
    }

    /// Terminal records are never updated again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionStatus::Pending)
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DecisionStatus::Pending),
            "accepted" => Ok(DecisionStatus::Accepted),
            "rejected" => Ok(DecisionStatus::Rejected),
            "error" => Ok(DecisionStatus::Error),
            _ => Err(ParseEnumError::new("decision status", s)),
        }
    }
}

/// Pipeline stage a log entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStep {
    SignalReceived,
    FiltersApplied,
    LimitsChecked,
    AcceptedForExecution,
    Rejected,
    ExecuteCalled,
    ExchangeResponse,
    Error,
}

impl LedgerStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStep::SignalReceived => "signal_received",
            LedgerStep::FiltersApplied => "filters_applied",
            LedgerStep::LimitsChecked => "limits_checked",
            LedgerStep::AcceptedForExecution => "accepted_for_execution",
            LedgerStep::Rejected => "rejected",
            LedgerStep::ExecuteCalled => "execute_called",
            LedgerStep::ExchangeResponse => "exchange_response",
            LedgerStep::Error => "error",
        }
    }
}

impl fmt::Display for LedgerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStep {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal_received" => Ok(LedgerStep::SignalReceived),
            "filters_applied" => Ok(LedgerStep::FiltersApplied),
            "limits_checked" => Ok(LedgerStep::LimitsChecked),
            "accepted_for_execution" => Ok(LedgerStep::AcceptedForExecution),
            "rejected" => Ok(LedgerStep::Rejected),
            "execute_called" => Ok(LedgerStep::ExecuteCalled),
            "exchange_response" => Ok(LedgerStep::ExchangeResponse),
            "error" => Ok(LedgerStep::Error),
            _ => Err(ParseEnumError::new("ledger step", s)),
        }
    }
}

/// Audit record for one signal-processing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub signal_id: String,
    pub source: SignalSource,
    pub symbol: String,
    pub direction: Direction,
    pub status: DecisionStatus,
    pub reason_code: Option<String>,
    pub reason: Option<String>,
    pub trade_id: Option<String>,
    /// Set on follower records created by copy-trading
    pub master_trade_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a fresh pending record
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub user_id: Uuid,
    pub signal_id: String,
    pub source: SignalSource,
    pub symbol: String,
    pub direction: Direction,
    pub master_trade_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewDecision {
    pub fn from_signal(user_id: Uuid, signal: &UnifiedSignal) -> Self {
        Self {
            user_id,
            signal_id: signal.id.clone(),
            source: signal.source,
            symbol: signal.symbol.clone(),
            direction: signal.direction(),
            master_trade_id: None,
            metadata: serde_json::json!({ "signal": signal.snapshot() }),
        }
    }

    pub fn with_master_trade(mut self, trade_id: impl Into<String>) -> Self {
        self.master_trade_id = Some(trade_id.into());
        self
    }

    pub(crate) fn into_record(self, now: DateTime<Utc>) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            signal_id: self.signal_id,
            source: self.source,
            symbol: self.symbol,
            direction: self.direction,
            status: DecisionStatus::Pending,
            reason_code: None,
            reason: None,
            trade_id: None,
            master_trade_id: self.master_trade_id,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a pending record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionPatch {
    pub status: Option<DecisionStatus>,
    pub reason_code: Option<String>,
    pub reason: Option<String>,
    pub trade_id: Option<String>,
    /// Merged key by key into the stored metadata
    pub metadata: Option<serde_json::Value>,
}

impl DecisionPatch {
    pub fn accepted(trade_id: Option<String>) -> Self {
        Self {
            status: Some(DecisionStatus::Accepted),
            trade_id,
            ..Default::default()
        }
    }

    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: Some(DecisionStatus::Rejected),
            reason_code: Some(code.into()),
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(DecisionStatus::Error),
            reason_code: Some(code.into()),
            reason: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn metadata(metadata: serde_json::Value) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Apply onto a record in place
    pub(crate) fn apply(self, record: &mut DecisionRecord, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if self.reason_code.is_some() {
            record.reason_code = self.reason_code;
        }
        if self.reason.is_some() {
            record.reason = self.reason;
        }
        if self.trade_id.is_some() {
            record.trade_id = self.trade_id;
        }
        if let Some(metadata) = self.metadata {
            merge_metadata(&mut record.metadata, metadata);
        }
        record.updated_at = now;
    }
}

/// Shallow merge; a non-object patch replaces the whole value
pub(crate) fn merge_metadata(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (target, patch) => *target = patch,
    }
}

/// Append-only audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub decision_id: Uuid,
    /// Position within the record's log, starting at 1
    pub sequence: i64,
    pub step: LedgerStep,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(!DecisionStatus::Pending.is_terminal());
        assert!(DecisionStatus::Accepted.is_terminal());
        assert!(DecisionStatus::Rejected.is_terminal());
        assert!(DecisionStatus::Error.is_terminal());
    }

    #[test]
    fn test_step_names_round_trip() {
        for step in [LedgerStep::SignalReceived, LedgerStep::ExchangeResponse, LedgerStep::Error] {
            assert_eq!(step.as_str().parse::<LedgerStep>().unwrap(), step);
        }
        assert!("bogus".parse::<LedgerStep>().is_err());
    }

    #[test]
    fn test_metadata_merge() {
        let mut metadata = json!({"signal": {"id": "1"}, "risk": null});
        merge_metadata(&mut metadata, json!({"risk": {"flags": ["DAILY_LOSS"]}}));
        assert_eq!(metadata["signal"]["id"], "1");
        assert_eq!(metadata["risk"]["flags"][0], "DAILY_LOSS");
    }
}
