//! Externally visible status tags.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::ExecutionId;
use thiserror::Error;

/// Key under which the order status tag is published.
pub const STATUS_KEY: &str = "OrderStatus";

/// A publisher rejected a tag.
#[derive(Debug, Clone, Error)]
#[error("status publish failed: {0}")]
pub struct PublishError(pub String);

/// Attaches indexable key/value tags to a running execution.
///
/// Publishing is best effort: the saga logs a failure and carries on.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Upserts `key = value` for the execution.
    async fn publish(
        &self,
        execution_id: ExecutionId,
        key: &str,
        value: &str,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Default)]
struct VisibilityState {
    tags: HashMap<ExecutionId, HashMap<String, String>>,
    published: HashMap<ExecutionId, Vec<String>>,
    fail: bool,
}

/// In-memory publisher that doubles as a visibility index.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusPublisher {
    state: Arc<RwLock<VisibilityState>>,
}

impl InMemoryStatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until reset.
    pub fn set_fail(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail = fail;
    }

    /// Returns the current value of a tag.
    pub fn tag(&self, execution_id: ExecutionId, key: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tags
            .get(&execution_id)
            .and_then(|tags| tags.get(key).cloned())
    }

    /// Returns all current tags for an execution.
    pub fn tags(&self, execution_id: ExecutionId) -> HashMap<String, String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tags
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns every value published for an execution, in order.
    pub fn published(&self, execution_id: ExecutionId) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the executions whose `key` currently equals `value`, sorted.
    pub fn find(&self, key: &str, value: &str) -> Vec<ExecutionId> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = state
            .tags
            .iter()
            .filter(|(_, tags)| tags.get(key).is_some_and(|v| v == value))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl StatusPublisher for InMemoryStatusPublisher {
    async fn publish(
        &self,
        execution_id: ExecutionId,
        key: &str,
        value: &str,
    ) -> Result<(), PublishError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.fail {
            return Err(PublishError("visibility store unavailable".to_string()));
        }

        state
            .tags
            .entry(execution_id)
            .or_default()
            .insert(key.to_string(), value.to_string());
        state
            .published
            .entry(execution_id)
            .or_default()
            .push(value.to_string());
        Ok(())
    }
}
