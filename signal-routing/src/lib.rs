// Signal Routing (Layer 1)
// Pulls candidate signals from the upstream engines and normalizes them for the decision pipeline

pub mod adapters;
pub mod router;
pub mod sources;
pub mod storage;

pub use adapters::{select_latest, timeframe_minutes, AdapterPolicy, SignalAdapter, SourceAdapter};
pub use router::{RoutedSignal, SignalRouter};
pub use sources::{
    LegacySignalRow, PatternSignalRow, RawSignal, RealtimeSignalRow, WebhookAlertRow,
    UNSCORED_ALERT_CONFIDENCE,
};
pub use storage::{
    CandidateQuery, InMemorySignalSourceStore, PgSignalSourceStore, SignalSourceStore,
    ALERT_PENDING, ALERT_PROCESSED,
};
