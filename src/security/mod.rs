//! Security Monitor: event ingestion, sliding-window threshold rules,
//! alerting, and the temporary block registry.
//!
//! Counting is always a re-query of the event log within the rule's
//! window, never an in-memory tally, so counts stay exact across process
//! restarts and concurrent instances. Block expiry is lazy: every read
//! filters on `expires_at > NOW()`, and the optional cleanup task only
//! prunes storage.

pub mod blocks;
pub mod cleanup;
pub mod events;
pub mod models;
pub mod monitor;
pub mod report;

pub use models::{Alert, AlertType, Block, EventKind, Origin, Severity};
pub use monitor::SecurityMonitor;
pub use report::{SecurityReport, SecurityReporter};
