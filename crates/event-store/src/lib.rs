//! Append-only event log for one conversation.
//!
//! Events live in an arena (`Vec<Arc<Event>>`) that only ever grows; a
//! separate id index serves point lookups. Writers are serialized and can
//! assert the version they read before writing, so read-then-write callers
//! never lose updates.

pub mod api;
pub mod config;
pub mod errors;
pub mod journal;
pub mod metrics;
pub mod model;
pub mod read;

pub use api::{EventLog, EventStoreResult, EventSubscription, PostHook};
pub use config::{EventStoreConfig, JournalCfg, StreamCfg};
pub use errors::{EsError, EsErrorKind};
pub use metrics::{EsMetrics, EsMetricsSnapshot};
pub use model::{Event, EventDraft, EventKind, HealAudit, MessagePayload, StateUpdate};
pub use read::slice::EventSlice;
