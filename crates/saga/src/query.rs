//! Named synchronous queries against a running execution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Result, SagaError};

/// Query returning the current progress percentage.
pub const QUERY_PROGRESS: &str = "getProgress";

/// Query returning the fetched item list.
pub const QUERY_ITEMS: &str = "getItems";

/// A query handler. Must not block.
pub type QueryHandler = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Per-execution registry of query handlers.
#[derive(Clone, Default)]
pub struct QueryRegistry {
    handlers: Arc<RwLock<HashMap<String, QueryHandler>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one under the same name.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(handler));
    }

    /// Runs the named query.
    pub fn query(&self, name: &str) -> Result<serde_json::Value> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SagaError::UnknownQuery(name.to_string()))?;
        Ok(handler())
    }

    /// Returns the registered query names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("names", &self.names())
            .finish()
    }
}
