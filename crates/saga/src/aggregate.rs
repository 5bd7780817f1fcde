//! Saga instance aggregate.

use chrono::{DateTime, Utc};
use common::ExecutionId;
use domain::{Aggregate, Items, OrderInput, OrderOutput};
use history::{HistoryEvent, Version};
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationOutcome;
use crate::error::{Result, SagaFailure};
use crate::events::{SagaEvent, StepOutcome, StepRecord};
use crate::order_fulfillment::STEP_GET_ITEMS;
use crate::state::SagaPhase;

/// A saga execution as recorded in history.
///
/// Folding the history yields the phase, progress, every recorded step
/// attempt and the final result. This is a read model; the running
/// orchestrator keeps its own state in its context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaInstance {
    id: Option<ExecutionId>,
    version: Version,
    workflow_type: String,
    input: Option<OrderInput>,
    phase: SagaPhase,
    progress: u8,
    progress_history: Vec<u8>,
    status_tags: Vec<String>,
    step_records: Vec<StepRecord>,
    compensations: Vec<CompensationOutcome>,
    items: Items,
    tracking_id: Option<String>,
    address: Option<String>,
    address_locked: bool,
    cancel_requested: bool,
    output: Option<OrderOutput>,
    failure: Option<SagaFailure>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;

    fn aggregate_type() -> &'static str {
        "OrderFulfillmentSaga"
    }

    fn id(&self) -> Option<ExecutionId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.execution_id);
                self.workflow_type = data.workflow_type;
                self.address = Some(data.input.address.clone());
                self.input = Some(data.input);
                self.started_at = Some(data.started_at);
            }
            SagaEvent::PhaseChanged(data) => {
                self.phase = data.to;
            }
            SagaEvent::ProgressUpdated(data) => {
                self.progress = data.progress;
                self.progress_history.push(data.progress);
            }
            SagaEvent::StatusPublished(data) => {
                self.status_tags.push(data.value);
            }
            SagaEvent::StepAttempted(record) => {
                if record.step_name == STEP_GET_ITEMS
                    && let StepOutcome::Succeeded { output } = &record.outcome
                    && let Ok(items) = serde_json::from_value::<Items>(output.clone())
                {
                    self.items = items;
                }
                self.step_records.push(record);
            }
            SagaEvent::CompensationRegistered(_) => {
                // Only outcomes are part of the view
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.compensations
                    .push(CompensationOutcome::succeeded(data.step, data.undo_step));
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.compensations.push(CompensationOutcome::failed(
                    data.step,
                    data.undo_step,
                    data.error.unwrap_or_default(),
                ));
            }
            SagaEvent::TimerFired(_) => {}
            SagaEvent::ValueGenerated(data) => {
                self.tracking_id = Some(data.value);
            }
            SagaEvent::AddressUpdateReceived(data) => {
                self.address = Some(data.address);
            }
            SagaEvent::AddressResolved(data) => {
                self.address = Some(data.address);
                self.address_locked = true;
            }
            SagaEvent::CancelRequested(_) => {
                self.cancel_requested = true;
            }
            SagaEvent::SagaCompleted(data) => {
                self.phase = SagaPhase::Completed;
                self.output = Some(data.output);
                self.finished_at = Some(data.completed_at);
            }
            SagaEvent::SagaFailed(data) => {
                self.phase = SagaPhase::Failed;
                self.failure = Some(data.failure);
                self.finished_at = Some(data.failed_at);
            }
        }
    }
}

impl SagaInstance {
    /// Folds a stored history into a saga view.
    pub fn from_history(history: &[HistoryEvent]) -> Result<Self> {
        let mut saga = Self::default();
        for stored in history {
            saga.apply(SagaEvent::from_history(stored)?);
            saga.set_version(stored.version);
        }
        Ok(saga)
    }
}

// Query methods
impl SagaInstance {
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn input(&self) -> Option<&OrderInput> {
        self.input.as_ref()
    }

    /// Returns the order ID this saga is fulfilling.
    pub fn order_id(&self) -> Option<&str> {
        self.input.as_ref().map(|input| input.order_id.as_str())
    }

    pub fn phase(&self) -> SagaPhase {
        self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Returns every committed progress value, in order.
    pub fn progress_history(&self) -> &[u8] {
        &self.progress_history
    }

    /// Returns every published status tag value, in order.
    pub fn status_tags(&self) -> &[String] {
        &self.status_tags
    }

    pub fn step_records(&self) -> &[StepRecord] {
        &self.step_records
    }

    /// Returns the recorded attempts of one step name.
    pub fn attempts_of<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a StepRecord> + 'a {
        self.step_records.iter().filter(move |r| r.step_name == step)
    }

    pub fn compensations(&self) -> &[CompensationOutcome] {
        &self.compensations
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }

    /// Returns the address currently in effect.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn address_locked(&self) -> bool {
        self.address_locked
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn output(&self) -> Option<&OrderOutput> {
        self.output.as_ref()
    }

    pub fn failure(&self) -> Option<&SagaFailure> {
        self.failure.as_ref()
    }

    /// Returns true once a result has been recorded.
    pub fn is_finished(&self) -> bool {
        self.output.is_some() || self.failure.is_some()
    }
}
