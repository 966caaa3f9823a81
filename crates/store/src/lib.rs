//! Authoritative in-memory state for every sensor the gateway knows about.
//!
//! Producers write through [`SensorStore::upsert`] and
//! [`SensorStore::mark_disconnected`]; the live hub and remote sync only read
//! snapshots and listen for [`StoreEvent`]s.

pub mod history;
pub mod store;

pub use history::DayHistory;
pub use store::{ChangeKind, SensorSnapshot, SensorStore, StoreConfig, StoreEvent};
