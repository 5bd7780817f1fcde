use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    ExecutionId, HistoryError, HistoryEvent, HistoryQuery, Result, Version,
    store::{AppendOptions, HistoryStore, HistoryStream, validate_append},
};

/// In-memory history store.
///
/// Events are kept in insertion order, which is also the order
/// `stream_all` yields them in. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    events: Arc<RwLock<Vec<HistoryEvent>>>,
}

impl InMemoryHistoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<HistoryEvent>, options: AppendOptions) -> Result<Version> {
        validate_append(&events)?;

        let first_event = &events[0];
        let execution_id = first_event.execution_id;

        let mut store = self.events.write().await;

        let current_version = store
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(HistoryError::ConcurrencyConflict {
                execution_id,
                expected,
                actual: current_version,
            });
        }

        // Versions stay dense even when the caller skips the expectation.
        if first_event.version != current_version.next() {
            return Err(HistoryError::ConcurrencyConflict {
                execution_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let count = events.len();
        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);
        store.extend(events);

        metrics::counter!("history_events_appended_total").increment(count as u64);
        tracing::trace!(%execution_id, version = %last_version, "history appended");

        Ok(last_version)
    }

    async fn read_history(&self, execution_id: ExecutionId) -> Result<Vec<HistoryEvent>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEvent>> {
        let store = self.events.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);

        let events = store
            .iter()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect();

        Ok(events)
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<HistoryEvent>> {
        let store = self.events.read().await;
        Ok(store
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn stream_all(&self) -> Result<HistoryStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn current_version(&self, execution_id: ExecutionId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| e.execution_id == execution_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryStoreExt;

    fn create_test_event(
        execution_id: ExecutionId,
        version: Version,
        event_type: &str,
    ) -> HistoryEvent {
        HistoryEvent::builder()
            .execution_id(execution_id)
            .workflow_type("TestWorkflow")
            .event_type(event_type)
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();
        let event = create_test_event(execution_id, Version::first(), "TestEvent");

        let result = store.append(vec![event], AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Version::first());

        let events = store.read_history(execution_id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn append_multiple_events() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();

        let events = vec![
            create_test_event(execution_id, Version::new(1), "Event1"),
            create_test_event(execution_id, Version::new(2), "Event2"),
            create_test_event(execution_id, Version::new(3), "Event3"),
        ];

        let result = store.append(events, AppendOptions::expect_new()).await;
        assert_eq!(result.unwrap(), Version::new(3));

        let stored = store.read_history(execution_id).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();

        let event1 = create_test_event(execution_id, Version::first(), "Event1");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event(execution_id, Version::new(2), "Event2");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_version(Version::initial()),
            )
            .await;

        assert!(matches!(
            result,
            Err(HistoryError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn append_with_expected_version_succeeds() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();

        let event1 = create_test_event(execution_id, Version::first(), "Event1");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event(execution_id, Version::new(2), "Event2");
        let result = store
            .append_event(event2, AppendOptions::expect_version(Version::first()))
            .await;

        assert_eq!(result.unwrap(), Version::new(2));
    }

    #[tokio::test]
    async fn version_gap_is_a_conflict_without_expectation() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();

        let event = create_test_event(execution_id, Version::new(3), "Event3");
        let result = store.append(vec![event], AppendOptions::new()).await;

        assert!(matches!(
            result,
            Err(HistoryError::ConcurrencyConflict { .. })
        ));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn failed_append_stores_nothing() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();
        let events = vec![
            create_test_event(execution_id, Version::new(1), "Event1"),
            create_test_event(execution_id, Version::new(3), "Event3"),
        ];

        let result = store.append(events, AppendOptions::new()).await;
        assert!(matches!(result, Err(HistoryError::InvalidAppend(_))));
        assert!(!store.execution_exists(execution_id).await.unwrap());
    }

    #[tokio::test]
    async fn get_events_by_type() {
        let store = InMemoryHistoryStore::new();
        let id1 = ExecutionId::new();
        let id2 = ExecutionId::new();

        store
            .append(
                vec![create_test_event(id1, Version::first(), "SagaStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id2, Version::first(), "SagaCompleted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id2, Version::new(2), "SagaStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let started = store.get_events_by_type("SagaStarted").await.unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].execution_id, id1);

        let completed = store.get_events_by_type("SagaCompleted").await.unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn query_with_filters_and_paging() {
        let store = InMemoryHistoryStore::new();
        let id = ExecutionId::new();

        let events = (1..=5)
            .map(|v| create_test_event(id, Version::new(v), "StepAttempted"))
            .collect();
        store.append(events, AppendOptions::new()).await.unwrap();

        let tail = store
            .query(HistoryQuery::for_execution(id).from_version(Version::new(4)))
            .await
            .unwrap();
        let versions: Vec<_> = tail.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![4, 5]);

        let page = store
            .query(
                HistoryQuery::for_execution(id)
                    .event_type("StepAttempted")
                    .from_version(Version::new(2))
                    .limit(2),
            )
            .await
            .unwrap();
        let versions: Vec<_> = page.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn stream_all_in_insertion_order() {
        use futures_util::StreamExt;

        let store = InMemoryHistoryStore::new();
        let id1 = ExecutionId::new();
        let id2 = ExecutionId::new();

        store
            .append(
                vec![create_test_event(id1, Version::first(), "Event1")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event(id2, Version::first(), "Event2")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let stream = store.stream_all().await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().execution_id, id1);
        assert_eq!(events[1].as_ref().unwrap().execution_id, id2);
    }

    #[tokio::test]
    async fn current_version_tracks_appends() {
        let store = InMemoryHistoryStore::new();
        let execution_id = ExecutionId::new();

        assert!(store.current_version(execution_id).await.unwrap().is_none());

        let events = vec![
            create_test_event(execution_id, Version::new(1), "Event1"),
            create_test_event(execution_id, Version::new(2), "Event2"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        let version = store.current_version(execution_id).await.unwrap();
        assert_eq!(version, Some(Version::new(2)));
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let store = InMemoryHistoryStore::new();
        let other = store.clone();
        let execution_id = ExecutionId::new();

        store
            .append(
                vec![create_test_event(execution_id, Version::first(), "Event1")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        assert!(other.execution_exists(execution_id).await.unwrap());
        other.clear().await;
        assert_eq!(store.event_count().await, 0);
    }
}
