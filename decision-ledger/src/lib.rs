//! Decision Ledger
//!
//! One record per signal-processing attempt plus an append-only log of the
//! steps it went through, so every accepted, rejected or failed signal can be
//! explained after the fact.

mod ledger;
mod postgres;
mod record;

pub use ledger::{DecisionLedger, InMemoryLedger, LedgerError, LedgerResult};
pub use postgres::PgDecisionLedger;
pub use record::{DecisionPatch, DecisionRecord, DecisionStatus, LedgerStep, LogEntry, NewDecision};
