use crate::{ExecutionId, HistoryEvent, Version};

/// Filter over stored history, used to page through one execution's events.
///
/// Filters combine with AND; an unset filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub execution_id: Option<ExecutionId>,
    pub event_type: Option<String>,
    /// Inclusive.
    pub from_version: Option<Version>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for one execution's history.
    pub fn for_execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Default::default()
        }
    }

    pub fn execution_id(mut self, id: ExecutionId) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn from_version(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the event passes every filter; `limit` is applied by the store.
    pub fn matches(&self, event: &HistoryEvent) -> bool {
        self.execution_id.is_none_or(|id| event.execution_id == id)
            && self
                .event_type
                .as_ref()
                .is_none_or(|event_type| &event.event_type == event_type)
            && self.from_version.is_none_or(|from| event.version >= from)
    }
}
