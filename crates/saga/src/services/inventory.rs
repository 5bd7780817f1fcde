//! Inventory service trait and in-memory implementation.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{Items, OrderInput};

use super::{CallJournal, FailurePlan};
use crate::error::StepError;

/// Trait for item lookup.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Returns the items to fulfil for an order, sorted by id.
    async fn get_items(&self, input: &OrderInput) -> Result<Items, StepError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    plan: FailurePlan,
    items_override: Option<Items>,
    calls: usize,
}

/// In-memory inventory service for testing.
///
/// Returns the order's own line items, or the catalog when it has none.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
    journal: CallJournal,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn set_plan(&self, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .plan = plan;
    }

    /// Returns `items` for every order instead of the order's own.
    pub fn set_items(&self, items: Items) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .items_override = Some(items);
    }

    /// Returns the number of get_items calls.
    pub fn call_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn get_items(&self, input: &OrderInput) -> Result<Items, StepError> {
        self.journal.record("GetItems");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.calls += 1;
        state.plan.next("inventory")?;

        if let Some(items) = &state.items_override {
            return Ok(items.clone());
        }
        if input.line_items.is_empty() {
            return Ok(Items::catalog());
        }
        Ok(input.line_items.clone())
    }
}
