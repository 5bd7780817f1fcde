//! Fraud check service trait and in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::OrderInput;

use super::{CallJournal, FailurePlan};
use crate::error::StepError;

/// Trait for fraud screening.
#[async_trait]
pub trait FraudService: Send + Sync {
    /// Succeeds if the order may proceed. A rejection is terminal.
    async fn check_fraud(&self, input: &OrderInput) -> Result<(), StepError>;
}

#[derive(Debug, Default)]
struct InMemoryFraudState {
    plan: FailurePlan,
    flagged: HashSet<String>,
    calls: usize,
}

/// In-memory fraud service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFraudService {
    state: Arc<RwLock<InMemoryFraudState>>,
    journal: CallJournal,
}

impl InMemoryFraudService {
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

    /// Rejects every check for the given order.
    pub fn flag_order(&self, order_id: impl Into<String>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .flagged
            .insert(order_id.into());
    }

    pub fn call_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }
}

#[async_trait]
impl FraudService for InMemoryFraudService {
    async fn check_fraud(&self, input: &OrderInput) -> Result<(), StepError> {
        self.journal.record("CheckFraud");
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.calls += 1;
        state.plan.next("fraud")?;

        if state.flagged.contains(&input.order_id) {
            return Err(StepError::terminal(format!(
                "order {} flagged as fraudulent",
                input.order_id
            )));
        }
        Ok(())
    }
}
