//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::OrderInput;
use serde::{Deserialize, Serialize};

use super::{CallJournal, FailurePlan};
use crate::error::StepError;

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the customer for an order on behalf of `workflow_type`.
    async fn charge(&self, input: &OrderInput, workflow_type: &str)
    -> Result<PaymentResult, StepError>;

    /// Refunds the order's charge. Refunding an unknown order is a no-op.
    async fn refund(&self, input: &OrderInput) -> Result<(), StepError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, String>,
    next_id: u32,
    charge_plan: FailurePlan,
    refund_plan: FailurePlan,
    charge_calls: usize,
    refund_calls: usize,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
    journal: CallJournal,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Configures every charge to be declined.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.set_charge_plan(if fail {
            FailurePlan::fail_terminally("Payment declined")
        } else {
            FailurePlan::succeed()
        });
    }

    pub fn set_charge_plan(&self, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .charge_plan = plan;
    }

    pub fn set_refund_plan(&self, plan: FailurePlan) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .refund_plan = plan;
    }

    /// Returns the number of active payments.
    pub fn payment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .len()
    }

    /// Returns the active payment for an order.
    pub fn payment_for(&self, order_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .get(order_id)
            .cloned()
    }

    pub fn charge_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .charge_calls
    }

    pub fn refund_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refund_calls
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        input: &OrderInput,
        workflow_type: &str,
    ) -> Result<PaymentResult, StepError> {
        self.journal.record("ChargeCustomer");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.charge_calls += 1;
        state.charge_plan.next("payment")?;

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(input.order_id.clone(), payment_id.clone());
        tracing::debug!(order_id = %input.order_id, workflow_type, %payment_id, "customer charged");

        Ok(PaymentResult { payment_id })
    }

    async fn refund(&self, input: &OrderInput) -> Result<(), StepError> {
        self.journal.record("RefundCustomer");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.refund_calls += 1;
        state.refund_plan.next("payment")?;
        state.payments.remove(&input.order_id);
        Ok(())
    }
}
