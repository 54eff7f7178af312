//! Trade executor boundary: live HTTP execution and a paper double

use crate::payload::OrderPlan;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// A single trade submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub user_id: Uuid,
    pub plan: OrderPlan,
    /// Reference to stored exchange credentials, never the secrets themselves
    pub credentials_ref: Option<String>,
    pub idempotency_key: String,
}

impl ExecutionRequest {
    pub fn new(user_id: Uuid, plan: OrderPlan) -> Self {
        let idempotency_key = plan.signal_id.clone();
        Self {
            user_id,
            credentials_ref: plan.platform_id.map(|id| id.to_string()),
            plan,
            idempotency_key,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub success: bool,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_detail: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ExecutionResponse {
    /// Accepted and filled with a trade id: not rejected, not failed, not left pending
    pub fn is_filled(&self) -> bool {
        self.success
            && self.trade_id.is_some()
            && !matches!(
                self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
                Some("failed") | Some("pending")
            )
    }

    /// Human-readable failure reason
    pub fn failure_reason(&self) -> String {
        if let Some(message) = &self.error_message {
            return message.clone();
        }
        match self.status.as_deref() {
            Some(status) if !status.eq_ignore_ascii_case("filled") => {
                format!("execution ended with status '{}'", status)
            }
            _ if self.success && self.trade_id.is_none() => "executor reported success without a trade id".to_string(),
            _ => "executor reported failure".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("executor rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid executor response: {0}")]
    InvalidResponse(String),
}

/// Trait for trade execution backends
#[async_trait::async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, ExecutorError>;
}

/// HTTP executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExecutorConfig {
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Posts order plans to the execution service
pub struct HttpTradeExecutor {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpTradeExecutor {
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint,
            api_key: config.api_key,
            client,
        })
    }
}

#[async_trait::async_trait]
impl TradeExecutor for HttpTradeExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, ExecutorError> {
        debug!(
            user_id = %request.user_id,
            symbol = %request.plan.symbol,
            key = %request.idempotency_key,
            "Submitting trade"
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        classify_response(status, body)
    }
}

/// Any non-2xx is a rejection, even when the body parses as a response
fn classify_response(status: reqwest::StatusCode, body: String) -> Result<ExecutionResponse, ExecutorError> {
    if !status.is_success() {
        // Prefer the executor's own message over the raw body
        let body = serde_json::from_str::<ExecutionResponse>(&body)
            .ok()
            .and_then(|parsed| parsed.error_message)
            .unwrap_or(body);
        return Err(ExecutorError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ExecutorError::InvalidResponse(e.to_string()))
}

/// Simulated fills at the planned entry price.
///
/// A repeated idempotency key replays the first response instead of opening
/// a second trade.
#[derive(Default)]
pub struct PaperTradeExecutor {
    fills: DashMap<String, ExecutionResponse>,
}

impl PaperTradeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct trades opened
    pub fn fill_count(&self) -> usize {
        self.fills.len()
    }
}

#[async_trait::async_trait]
impl TradeExecutor for PaperTradeExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, ExecutorError> {
        if let Some(previous) = self.fills.get(&request.idempotency_key) {
            warn!(key = %request.idempotency_key, "Replaying paper fill for repeated key");
            return Ok(previous.clone());
        }

        let plan = &request.plan;
        let response = ExecutionResponse {
            success: true,
            trade_id: Some(format!("paper-{}", Uuid::new_v4())),
            error_message: None,
            execution_detail: Some(serde_json::json!({
                "mode": "paper",
                "symbol": plan.symbol,
                "direction": plan.direction,
                "fill_price": plan.entry_price,
                "filled_amount": plan.initial_amount,
                "filled_at": Utc::now(),
            })),
            status: Some("filled".to_string()),
        };

        info!(
            user_id = %request.user_id,
            symbol = %plan.symbol,
            amount = %plan.initial_amount,
            "Paper trade filled"
        );

        let entry = self
            .fills
            .entry(request.idempotency_key.clone())
            .or_insert(response);
        Ok(entry.value().clone())
    }
}
