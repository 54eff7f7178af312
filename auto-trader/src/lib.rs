//! Auto-Trading Worker (Layer 5)
//!
//! Wires routing, filtering, risk, execution and the decision ledger into a
//! per-tick worker with an HTTP trigger.

pub mod copy_trading;
pub mod entitlements;
pub mod filters;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod settings;

pub use copy_trading::{
    Allocation, CopyReport, CopyTrader, FollowerStore, FollowerSubscription, InMemoryFollowerStore,
    MasterTrade, PgFollowerStore,
};
pub use entitlements::{Capability, EntitlementChecker, StaticEntitlements};
pub use filters::{apply_filters, FilterCode, FilterResult, RuntimeContext, DEFAULT_MIN_CONFIDENCE};
pub use pipeline::{
    ProcessOutcome, SignalProcessor, SuccessForecaster, EXECUTION_FAILED, EXECUTION_SKIPPED,
    PROCESSING_ERROR,
};
pub use scheduler::{Scheduler, TickError, TickReport};
pub use server::{create_router, start_server, AppState, TickResponse};
pub use settings::WorkerSettings;
