//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::Item;
use serde::{Deserialize, Serialize};

use super::{CallJournal, FailurePlan};
use crate::error::StepError;

/// One shipping child's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRequest {
    pub order_id: String,
    pub address: String,
    pub item: Item,
}

/// Result of a successful shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentResult {
    pub item_id: u64,
    /// The shipment number assigned by the carrier.
    pub shipment_number: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Ships a single item to the request's address.
    async fn ship_item(&self, request: &ShipmentRequest) -> Result<ShipmentResult, StepError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: Vec<ShipmentRequest>,
    next_id: u32,
    default_plan: FailurePlan,
    item_plans: HashMap<u64, FailurePlan>,
    calls: HashMap<u64, usize>,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
    journal: CallJournal,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Configures every shipment to be rejected.
    pub fn set_fail_on_ship(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .default_plan = if fail {
            FailurePlan::fail_terminally("Shipping unavailable")
        } else {
            FailurePlan::succeed()
        };
    }

    /// Scripts failures for one item only.
    pub fn set_item_plan(&self, item_id: u64, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .item_plans
            .insert(item_id, plan);
    }

    /// Returns the number of shipped items.
    pub fn shipment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .len()
    }

    /// Returns the ids of shipped items, in shipping order.
    pub fn shipped_items(&self) -> Vec<u64> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .iter()
            .map(|s| s.item.id)
            .collect()
    }

    /// Returns the address used for every shipment so far.
    pub fn shipped_addresses(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .iter()
            .map(|s| s.address.clone())
            .collect()
    }

    /// Returns how many times shipping was attempted for an item.
    pub fn call_count(&self, item_id: u64) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .get(&item_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn ship_item(&self, request: &ShipmentRequest) -> Result<ShipmentResult, StepError> {
        self.journal.record(format!("ShipOrder:{}", request.item.id));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state.calls.entry(request.item.id).or_default() += 1;

        match state.item_plans.get_mut(&request.item.id) {
            Some(plan) => plan.next("carrier")?,
            None => state.default_plan.next("carrier")?,
        }

        state.next_id += 1;
        let shipment_number = format!("SHIP-{:04}", state.next_id);
        state.shipments.push(request.clone());

        Ok(ShipmentResult {
            item_id: request.item.id,
            shipment_number,
        })
    }
}
