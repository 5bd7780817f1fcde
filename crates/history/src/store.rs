use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{ExecutionId, HistoryError, HistoryEvent, HistoryQuery, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the execution's history for optimistic concurrency.
    /// If None, no version check is performed.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the history to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the execution to have no history yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of history events.
pub type HistoryStream = Pin<Box<dyn Stream<Item = Result<HistoryEvent>> + Send>>;

/// Durable, append-only storage for execution histories.
///
/// Implementations must be thread-safe: the saga runtime appends from the
/// orchestrator task, from fan-out children and from external signal handlers.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends events atomically - either all succeed or none do.
    ///
    /// Fails with `ConcurrencyConflict` if `options.expected_version` is set
    /// and does not match the current version. Returns the new version.
    async fn append(&self, events: Vec<HistoryEvent>, options: AppendOptions) -> Result<Version>;

    /// Reads an execution's full history in version order.
    async fn read_history(&self, execution_id: ExecutionId) -> Result<Vec<HistoryEvent>>;

    /// Retrieves events matching a query in insertion order, up to `query.limit`.
    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEvent>>;

    /// Retrieves events of one type across all executions, oldest first.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<HistoryEvent>>;

    /// Streams every stored event in insertion order.
    async fn stream_all(&self) -> Result<HistoryStream>;

    /// Returns the current version of an execution's history, or None if the
    /// execution has never been recorded.
    async fn current_version(&self, execution_id: ExecutionId) -> Result<Option<Version>>;
}

/// Convenience methods available on every history store.
#[async_trait]
pub trait HistoryStoreExt: HistoryStore {
    /// Appends a single event.
    async fn append_event(&self, event: HistoryEvent, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Returns true if the execution has any recorded history.
    async fn execution_exists(&self, execution_id: ExecutionId) -> Result<bool> {
        Ok(self.current_version(execution_id).await?.is_some())
    }
}

impl<T: HistoryStore + ?Sized> HistoryStoreExt for T {}

/// Validates a batch before appending.
///
/// A batch must be non-empty, target a single execution and carry
/// consecutive versions.
pub fn validate_append(events: &[HistoryEvent]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(HistoryError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.execution_id != first.execution_id {
            return Err(HistoryError::InvalidAppend(
                "all events must belong to the same execution".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(HistoryError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(execution_id: ExecutionId, version: i64) -> HistoryEvent {
        HistoryEvent::builder()
            .event_type("TestEvent")
            .execution_id(execution_id)
            .workflow_type("Test")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_append(&[]),
            Err(HistoryError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_executions_are_rejected() {
        let batch = vec![event(ExecutionId::new(), 1), event(ExecutionId::new(), 2)];
        assert!(validate_append(&batch).is_err());
    }

    #[test]
    fn gaps_in_versions_are_rejected() {
        let id = ExecutionId::new();
        let batch = vec![event(id, 1), event(id, 3)];
        assert!(validate_append(&batch).is_err());
    }

    #[test]
    fn sequential_batch_is_accepted() {
        let id = ExecutionId::new();
        let batch = vec![event(id, 4), event(id, 5), event(id, 6)];
        assert!(validate_append(&batch).is_ok());
    }
}
