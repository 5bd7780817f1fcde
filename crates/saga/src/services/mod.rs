//! External service traits and in-memory implementations for saga steps.

pub mod fraud;
pub mod inventory;
pub mod payment;
pub mod shipment;
pub mod shipping;

use std::sync::{Arc, Mutex, PoisonError};

pub use fraud::{FraudService, InMemoryFraudService};
pub use inventory::{InMemoryInventoryService, InventoryService};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
pub use shipment::{InMemoryShipmentService, ShipmentService};
pub use shipping::{InMemoryShippingService, ShipmentRequest, ShipmentResult, ShippingService};

use crate::error::StepError;

/// The activities the order fulfillment saga calls.
#[derive(Clone)]
pub struct OrderActivities {
    pub inventory: Arc<dyn InventoryService>,
    pub fraud: Arc<dyn FraudService>,
    pub shipment: Arc<dyn ShipmentService>,
    pub payment: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
}

impl std::fmt::Debug for OrderActivities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderActivities").finish_non_exhaustive()
    }
}

/// Scripted failures for an in-memory service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePlan {
    retryable_failures: u32,
    terminal: Option<String>,
}

impl FailurePlan {
    /// Always succeeds.
    pub fn succeed() -> Self {
        Self::default()
    }

    /// Fails retryably `n` times, then succeeds.
    pub fn fail_times(n: u32) -> Self {
        Self {
            retryable_failures: n,
            terminal: None,
        }
    }

    /// Fails retryably on every call.
    pub fn fail_always() -> Self {
        Self::fail_times(u32::MAX)
    }

    /// Fails terminally on every call.
    pub fn fail_terminally(reason: impl Into<String>) -> Self {
        Self {
            retryable_failures: 0,
            terminal: Some(reason.into()),
        }
    }

    /// Consumes one call from the plan.
    pub(crate) fn next(&mut self, service: &str) -> Result<(), StepError> {
        if let Some(reason) = &self.terminal {
            return Err(StepError::terminal(reason.clone()));
        }
        if self.retryable_failures > 0 {
            if self.retryable_failures != u32::MAX {
                self.retryable_failures -= 1;
            }
            return Err(StepError::retryable(format!("{service} temporarily unavailable")));
        }
        Ok(())
    }
}

/// Ordered record of every activity invocation, shared across services.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.into());
    }

    /// Returns every call so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many times `call` was made.
    pub fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Returns the index of the first occurrence of `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|c| c == call)
    }
}

/// In-memory services sharing one call journal.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActivities {
    pub journal: CallJournal,
    pub inventory: InMemoryInventoryService,
    pub fraud: InMemoryFraudService,
    pub shipment: InMemoryShipmentService,
    pub payment: InMemoryPaymentService,
    pub shipping: InMemoryShippingService,
}

impl InMemoryActivities {
    pub fn new() -> Self {
        let journal = CallJournal::new();
        Self {
            inventory: InMemoryInventoryService::with_journal(journal.clone()),
            fraud: InMemoryFraudService::with_journal(journal.clone()),
            shipment: InMemoryShipmentService::with_journal(journal.clone()),
            payment: InMemoryPaymentService::with_journal(journal.clone()),
            shipping: InMemoryShippingService::with_journal(journal.clone()),
            journal,
        }
    }

    /// Returns trait-object handles over these services.
    pub fn activities(&self) -> OrderActivities {
        OrderActivities {
            inventory: Arc::new(self.inventory.clone()),
            fraud: Arc::new(self.fraud.clone()),
            shipment: Arc::new(self.shipment.clone()),
            payment: Arc::new(self.payment.clone()),
            shipping: Arc::new(self.shipping.clone()),
        }
    }
}
