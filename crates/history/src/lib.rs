//! Append-only history of saga executions.
//!
//! Each execution owns one stream of [`HistoryEvent`]s, ordered by a dense
//! [`Version`]. Appends are optimistic: a writer states the version it expects
//! the stream to be at, and a mismatch is reported as a conflict instead of
//! silently interleaving two writers.

pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod store;

pub use common::ExecutionId;
pub use error::{HistoryError, Result};
pub use event::{EventId, HistoryEvent, HistoryEventBuilder, Version};
pub use memory::InMemoryHistoryStore;
pub use query::HistoryQuery;
pub use store::{AppendOptions, HistoryStore, HistoryStoreExt, HistoryStream};
