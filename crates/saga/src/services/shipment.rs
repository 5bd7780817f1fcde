//! Shipment preparation service trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::OrderInput;

use super::{CallJournal, FailurePlan};
use crate::error::StepError;

/// Trait for preparing a shipment before payment.
#[async_trait]
pub trait ShipmentService: Send + Sync {
    /// Reserves warehouse capacity for the order.
    async fn prepare_shipment(&self, input: &OrderInput) -> Result<(), StepError>;

    /// Releases a prepared shipment. Must be idempotent.
    async fn undo_prepare_shipment(&self, input: &OrderInput) -> Result<(), StepError>;
}

#[derive(Debug, Default)]
struct InMemoryShipmentState {
    prepared: HashSet<String>,
    prepare_plan: FailurePlan,
    undo_plan: FailurePlan,
    undo_calls: usize,
}

/// In-memory shipment preparation service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipmentService {
    state: Arc<RwLock<InMemoryShipmentState>>,
    journal: CallJournal,
}

impl InMemoryShipmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn set_prepare_plan(&self, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .prepare_plan = plan;
    }

    pub fn set_undo_plan(&self, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .undo_plan = plan;
    }

    /// Returns true if a shipment is currently prepared for the order.
    pub fn is_prepared(&self, order_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .prepared
            .contains(order_id)
    }

    pub fn undo_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .undo_calls
    }
}

#[async_trait]
impl ShipmentService for InMemoryShipmentService {
    async fn prepare_shipment(&self, input: &OrderInput) -> Result<(), StepError> {
        self.journal.record("PrepareShipment");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.prepare_plan.next("warehouse")?;
        state.prepared.insert(input.order_id.clone());
        Ok(())
    }

    async fn undo_prepare_shipment(&self, input: &OrderInput) -> Result<(), StepError> {
        self.journal.record("UndoPrepareShipment");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.undo_calls += 1;
        state.undo_plan.next("warehouse")?;
        state.prepared.remove(&input.order_id);
        Ok(())
    }
}
