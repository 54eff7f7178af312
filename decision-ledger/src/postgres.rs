use crate::ledger::{DecisionLedger, LedgerError, LedgerResult};
use crate::record::{DecisionPatch, DecisionRecord, DecisionStatus, LedgerStep, LogEntry, NewDecision};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct DecisionRow {
    id: Uuid,
    user_id: Uuid,
    signal_id: String,
    signal_source: String,
    symbol: String,
    direction: String,
    status: String,
    reason_code: Option<String>,
    reason: Option<String>,
    trade_id: Option<String>,
    master_trade_id: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DecisionRow> for DecisionRecord {
    type Error = anyhow::Error;

    fn try_from(row: DecisionRow) -> Result<Self> {
        Ok(DecisionRecord {
            id: row.id,
            user_id: row.user_id,
            signal_id: row.signal_id,
            source: row.signal_source.parse()?,
            symbol: row.symbol,
            direction: row.direction.parse()?,
            status: row.status.parse()?,
            reason_code: row.reason_code,
            reason: row.reason,
            trade_id: row.trade_id,
            master_trade_id: row.master_trade_id,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    decision_id: Uuid,
    sequence: i64,
    step: String,
    message: String,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

const DECISION_COLUMNS: &str = "id, user_id, signal_id, signal_source, symbol, direction, status, \
     reason_code, reason, trade_id, master_trade_id, metadata, created_at, updated_at";

/// Postgres-backed decision ledger
pub struct PgDecisionLedger {
    db_pool: Arc<PgPool>,
}

impl PgDecisionLedger {
    pub fn new(db_pool: Arc<PgPool>) -> Self {
        Self { db_pool }
    }

    /// Create the decision and log tables
    pub async fn initialize(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS auto_trading_decisions (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                signal_id TEXT NOT NULL,
                signal_source TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reason_code TEXT,
                reason TEXT,
                trade_id TEXT,
                master_trade_id TEXT,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS auto_trading_logs (
                id BIGSERIAL PRIMARY KEY,
                decision_id UUID NOT NULL REFERENCES auto_trading_decisions(id),
                step TEXT NOT NULL,
                message TEXT NOT NULL,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_decisions_user ON auto_trading_decisions(user_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_decisions_signal ON auto_trading_decisions(signal_id)",
            "CREATE INDEX IF NOT EXISTS idx_logs_decision ON auto_trading_logs(decision_id, id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(self.db_pool.as_ref())
                .await
                .context("Failed to create decision ledger tables")?;
        }

        info!("Decision ledger tables initialized");
        Ok(())
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<DecisionStatus>> {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM auto_trading_decisions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db_pool.as_ref())
            .await
            .context("Failed to read decision status")?;

        status
            .map(|s| s.parse::<DecisionStatus>().map_err(anyhow::Error::from))
            .transpose()
    }
}

#[async_trait::async_trait]
impl DecisionLedger for PgDecisionLedger {
    async fn create_record(&self, decision: NewDecision) -> LedgerResult<DecisionRecord> {
        let record = decision.into_record(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO auto_trading_decisions (
                id, user_id, signal_id, signal_source, symbol, direction, status,
                master_trade_id, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.signal_id)
        .bind(record.source.as_str())
        .bind(&record.symbol)
        .bind(record.direction.as_str())
        .bind(record.status.as_str())
        .bind(&record.master_trade_id)
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to insert decision record")?;

        debug!(decision_id = %record.id, signal_id = %record.signal_id, "Decision record created");
        Ok(record)
    }

    async fn update_record(&self, id: Uuid, patch: DecisionPatch) -> LedgerResult<DecisionRecord> {
        // The status guard makes the terminal check and the write one statement
        let sql = format!(
            r#"
            UPDATE auto_trading_decisions
            SET status = COALESCE($2, status),
                reason_code = COALESCE($3, reason_code),
                reason = COALESCE($4, reason),
                trade_id = COALESCE($5, trade_id),
                metadata = CASE
                    WHEN $6::jsonb IS NULL THEN metadata
                    WHEN jsonb_typeof($6::jsonb) = 'object' AND jsonb_typeof(metadata) = 'object'
                        THEN metadata || $6::jsonb
                    ELSE $6::jsonb
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            DECISION_COLUMNS
        );

        let row = sqlx::query_as::<_, DecisionRow>(&sql)
            .bind(id)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.reason_code)
            .bind(patch.reason)
            .bind(patch.trade_id)
            .bind(patch.metadata)
            .fetch_optional(self.db_pool.as_ref())
            .await
            .context("Failed to update decision record")?;

        match row {
            Some(row) => Ok(DecisionRecord::try_from(row)?),
            None => match self.current_status(id).await? {
                Some(status) => Err(LedgerError::TerminalState { id, status }),
                None => Err(LedgerError::NotFound(id)),
            },
        }
    }

    async fn append_log(
        &self,
        id: Uuid,
        step: LedgerStep,
        message: &str,
        data: serde_json::Value,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO auto_trading_logs (decision_id, step, message, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(step.as_str())
        .bind(message)
        .bind(data)
        .execute(self.db_pool.as_ref())
        .await
        .context("Failed to append decision log")?;

        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> LedgerResult<Option<DecisionRecord>> {
        let sql = format!("SELECT {} FROM auto_trading_decisions WHERE id = $1", DECISION_COLUMNS);
        let row = sqlx::query_as::<_, DecisionRow>(&sql)
            .bind(id)
            .fetch_optional(self.db_pool.as_ref())
            .await
            .context("Failed to fetch decision record")?;

        Ok(row.map(DecisionRecord::try_from).transpose()?)
    }

    async fn logs(&self, id: Uuid) -> LedgerResult<Vec<LogEntry>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT decision_id,
                   ROW_NUMBER() OVER (ORDER BY id) AS sequence,
                   step, message, data, created_at
            FROM auto_trading_logs
            WHERE decision_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(self.db_pool.as_ref())
        .await
        .context("Failed to fetch decision logs")?;

        let entries = rows
            .into_iter()
            .map(|row| -> Result<LogEntry> {
                Ok(LogEntry {
                    decision_id: row.decision_id,
                    sequence: row.sequence,
                    step: row.step.parse()?,
                    message: row.message,
                    data: row.data,
                    created_at: row.created_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(entries)
    }
}
