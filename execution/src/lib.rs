// Execution (Layer 4)
// Order plan construction and the trade executor boundary

pub mod executor;
pub mod payload;
pub mod platform;

pub use executor::{
    ExecutionRequest, ExecutionResponse, ExecutorError, HttpExecutorConfig, HttpTradeExecutor,
    PaperTradeExecutor, TradeExecutor, IDEMPOTENCY_HEADER,
};
pub use payload::{
    build_payload, effective_capital, position_size, DcaLevel, OrderPlan, PlatformContext,
    BALANCE_USAGE,
};
pub use platform::{PlatformMonitor, StaticPlatformMonitor};
