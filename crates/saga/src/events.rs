//! Saga history events.

use chrono::{DateTime, Utc};
use common::ExecutionId;
use domain::{DomainEvent, OrderInput, OrderOutput};
use history::HistoryEvent;
use serde::{Deserialize, Serialize};

use crate::decision_log::DecisionKind;
use crate::error::SagaFailure;
use crate::options::SagaOptions;
use crate::state::SagaPhase;

/// Facts recorded in an execution's history.
///
/// Events carrying a `seq` are orchestrator decisions and are matched by
/// sequence number on replay. `SagaStarted`, `AddressUpdateReceived` and
/// `CancelRequested` come from outside the orchestrator and carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// The orchestrator moved to a new phase.
    PhaseChanged(PhaseChangedData),

    /// The progress value was committed.
    ProgressUpdated(ProgressData),

    /// A status tag was published.
    StatusPublished(StatusData),

    /// One attempt of a step finished.
    StepAttempted(StepRecord),

    /// An undo operation was pushed onto the compensation stack.
    CompensationRegistered(CompensationRegisteredData),

    /// An undo operation succeeded.
    CompensationStepCompleted(CompensationStepData),

    /// An undo operation failed (compensation continues).
    CompensationStepFailed(CompensationStepData),

    /// A durable sleep finished.
    TimerFired(TimerData),

    /// A nondeterministic value was captured.
    ValueGenerated(ValueData),

    /// A new destination address arrived.
    AddressUpdateReceived(AddressUpdateData),

    /// The address used for shipping was frozen.
    AddressResolved(AddressResolvedData),

    /// Cancellation was requested.
    CancelRequested(CancelData),

    /// Saga completed successfully.
    SagaCompleted(SagaCompletedData),

    /// Saga failed.
    SagaFailed(SagaFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::PhaseChanged(_) => "PhaseChanged",
            SagaEvent::ProgressUpdated(_) => "ProgressUpdated",
            SagaEvent::StatusPublished(_) => "StatusPublished",
            SagaEvent::StepAttempted(_) => "StepAttempted",
            SagaEvent::CompensationRegistered(_) => "CompensationRegistered",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::TimerFired(_) => "TimerFired",
            SagaEvent::ValueGenerated(_) => "ValueGenerated",
            SagaEvent::AddressUpdateReceived(_) => "AddressUpdateReceived",
            SagaEvent::AddressResolved(_) => "AddressResolved",
            SagaEvent::CancelRequested(_) => "CancelRequested",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub execution_id: ExecutionId,
    pub workflow_type: String,
    pub input: OrderInput,
    pub options: SagaOptions,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseChangedData {
    pub seq: u64,
    pub from: SagaPhase,
    pub to: SagaPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressData {
    pub seq: u64,
    pub progress: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub seq: u64,
    pub key: String,
    pub value: String,
    /// False if the publisher rejected the tag.
    pub delivered: bool,
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded { output: serde_json::Value },
    Retryable { error: String },
    Terminal { error: String },
    Cancelled,
}

/// One attempt of one step. Never mutated once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub seq: u64,
    pub step_name: String,
    pub input: serde_json::Value,
    /// 1-based attempt number.
    pub attempt: u32,
    pub outcome: StepOutcome,
    pub first_attempt_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    /// Wait chosen before the next attempt. `None` after a retryable
    /// failure means the policy allowed no further attempt.
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRegisteredData {
    pub seq: u64,
    pub step: String,
    pub undo_step: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStepData {
    pub seq: u64,
    pub step: String,
    pub undo_step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerData {
    pub seq: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueData {
    pub seq: u64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressUpdateData {
    pub address: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressResolvedData {
    pub seq: u64,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelData {
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub seq: u64,
    pub output: OrderOutput,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub seq: u64,
    pub failure: SagaFailure,
    pub failed_at: DateTime<Utc>,
}

impl SagaEvent {
    /// Returns the decision sequence number, if this event is a decision.
    pub fn seq(&self) -> Option<u64> {
        match self {
            SagaEvent::PhaseChanged(d) => Some(d.seq),
            SagaEvent::ProgressUpdated(d) => Some(d.seq),
            SagaEvent::StatusPublished(d) => Some(d.seq),
            SagaEvent::StepAttempted(d) => Some(d.seq),
            SagaEvent::CompensationRegistered(d) => Some(d.seq),
            SagaEvent::CompensationStepCompleted(d) | SagaEvent::CompensationStepFailed(d) => {
                Some(d.seq)
            }
            SagaEvent::TimerFired(d) => Some(d.seq),
            SagaEvent::ValueGenerated(d) => Some(d.seq),
            SagaEvent::AddressResolved(d) => Some(d.seq),
            SagaEvent::SagaCompleted(d) => Some(d.seq),
            SagaEvent::SagaFailed(d) => Some(d.seq),
            SagaEvent::SagaStarted(_)
            | SagaEvent::AddressUpdateReceived(_)
            | SagaEvent::CancelRequested(_) => None,
        }
    }

    /// Returns the decision kind, if this event is a decision.
    pub fn decision_kind(&self) -> Option<DecisionKind> {
        let kind = match self {
            SagaEvent::PhaseChanged(_) => DecisionKind::Phase,
            SagaEvent::ProgressUpdated(_) => DecisionKind::Progress,
            SagaEvent::StatusPublished(_) => DecisionKind::Status,
            SagaEvent::StepAttempted(_) => DecisionKind::Step,
            SagaEvent::CompensationRegistered(_) => DecisionKind::CompensationRegistered,
            SagaEvent::CompensationStepCompleted(_) | SagaEvent::CompensationStepFailed(_) => {
                DecisionKind::CompensationOutcome
            }
            SagaEvent::TimerFired(_) => DecisionKind::Timer,
            SagaEvent::ValueGenerated(_) => DecisionKind::Value,
            SagaEvent::AddressResolved(_) => DecisionKind::AddressResolved,
            SagaEvent::SagaCompleted(_) | SagaEvent::SagaFailed(_) => DecisionKind::Completion,
            SagaEvent::SagaStarted(_)
            | SagaEvent::AddressUpdateReceived(_)
            | SagaEvent::CancelRequested(_) => return None,
        };
        Some(kind)
    }

    /// Returns true for SagaCompleted and SagaFailed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaEvent::SagaCompleted(_) | SagaEvent::SagaFailed(_))
    }

    /// Decodes the payload of a stored history event.
    pub fn from_history(event: &HistoryEvent) -> Result<Self, serde_json::Error> {
        serde_json::from_value(event.payload.clone())
    }
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(
        execution_id: ExecutionId,
        workflow_type: impl Into<String>,
        input: OrderInput,
        options: SagaOptions,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            execution_id,
            workflow_type: workflow_type.into(),
            input,
            options,
            started_at: Utc::now(),
        })
    }

    pub fn phase_changed(seq: u64, from: SagaPhase, to: SagaPhase) -> Self {
        SagaEvent::PhaseChanged(PhaseChangedData { seq, from, to })
    }

    pub fn progress_updated(seq: u64, progress: u8) -> Self {
        SagaEvent::ProgressUpdated(ProgressData { seq, progress })
    }

    pub fn status_published(
        seq: u64,
        key: impl Into<String>,
        value: impl Into<String>,
        delivered: bool,
    ) -> Self {
        SagaEvent::StatusPublished(StatusData {
            seq,
            key: key.into(),
            value: value.into(),
            delivered,
        })
    }

    pub fn compensation_registered(
        seq: u64,
        step: impl Into<String>,
        undo_step: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        SagaEvent::CompensationRegistered(CompensationRegisteredData {
            seq,
            step: step.into(),
            undo_step: undo_step.into(),
            input,
        })
    }

    pub fn compensation_step_completed(
        seq: u64,
        step: impl Into<String>,
        undo_step: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepCompleted(CompensationStepData {
            seq,
            step: step.into(),
            undo_step: undo_step.into(),
            error: None,
        })
    }

    pub fn compensation_step_failed(
        seq: u64,
        step: impl Into<String>,
        undo_step: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(CompensationStepData {
            seq,
            step: step.into(),
            undo_step: undo_step.into(),
            error: Some(error.into()),
        })
    }

    pub fn timer_fired(seq: u64, duration_ms: u64) -> Self {
        SagaEvent::TimerFired(TimerData { seq, duration_ms })
    }

    pub fn value_generated(seq: u64, value: impl Into<String>) -> Self {
        SagaEvent::ValueGenerated(ValueData {
            seq,
            value: value.into(),
        })
    }

    pub fn address_update_received(address: impl Into<String>) -> Self {
        SagaEvent::AddressUpdateReceived(AddressUpdateData {
            address: address.into(),
            received_at: Utc::now(),
        })
    }

    pub fn address_resolved(seq: u64, address: impl Into<String>) -> Self {
        SagaEvent::AddressResolved(AddressResolvedData {
            seq,
            address: address.into(),
        })
    }

    pub fn cancel_requested(reason: Option<String>) -> Self {
        SagaEvent::CancelRequested(CancelData {
            reason,
            requested_at: Utc::now(),
        })
    }

    pub fn saga_completed(seq: u64, output: OrderOutput) -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            seq,
            output,
            completed_at: Utc::now(),
        })
    }

    pub fn saga_failed(seq: u64, failure: SagaFailure) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            seq,
            failure,
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(
            SagaEvent::phase_changed(1, SagaPhase::Started, SagaPhase::ItemsFetched).event_type(),
            "PhaseChanged"
        );
        assert_eq!(
            SagaEvent::progress_updated(2, 25).event_type(),
            "ProgressUpdated"
        );
        assert_eq!(
            SagaEvent::cancel_requested(None).event_type(),
            "CancelRequested"
        );
        assert_eq!(
            SagaEvent::saga_completed(9, OrderOutput::new("t", "a")).event_type(),
            "SagaCompleted"
        );
    }

    #[test]
    fn test_signals_are_not_decisions() {
        let started = SagaEvent::saga_started(
            ExecutionId::new(),
            "OrderFulfillment",
            OrderInput::new("A1", "1 Main St"),
            SagaOptions::default(),
        );
        assert!(started.seq().is_none());
        assert!(started.decision_kind().is_none());
        assert!(SagaEvent::address_update_received("x").seq().is_none());
        assert!(SagaEvent::cancel_requested(None).decision_kind().is_none());
    }

    #[test]
    fn test_decision_kinds() {
        assert_eq!(
            SagaEvent::timer_fired(4, 1000).decision_kind(),
            Some(DecisionKind::Timer)
        );
        assert_eq!(
            SagaEvent::compensation_step_failed(7, "ChargeCustomer", "RefundCustomer", "down")
                .decision_kind(),
            Some(DecisionKind::CompensationOutcome)
        );
        assert_eq!(SagaEvent::value_generated(12, "abc").seq(), Some(12));
    }

    #[test]
    fn test_tagged_serialization() {
        let event = SagaEvent::progress_updated(3, 50);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ProgressUpdated");
        assert_eq!(json["data"]["progress"], 50);

        let back: SagaEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(
            back,
            SagaEvent::ProgressUpdated(ProgressData {
                seq: 3,
                progress: 50
            })
        ));
    }

    #[test]
    fn test_step_outcome_serialization() {
        let outcome = StepOutcome::Retryable {
            error: "carrier busy".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "retryable");

        let cancelled = serde_json::to_value(StepOutcome::Cancelled).unwrap();
        assert_eq!(cancelled, serde_json::json!({"status": "cancelled"}));
    }

    #[test]
    fn test_from_history() {
        let event = SagaEvent::value_generated(5, "tracking");
        let stored = HistoryEvent::builder()
            .event_type(event.event_type())
            .execution_id(ExecutionId::new())
            .workflow_type("OrderFulfillment")
            .version(history::Version::first())
            .payload(&event)
            .unwrap()
            .build();

        let decoded = SagaEvent::from_history(&stored).unwrap();
        assert!(matches!(decoded, SagaEvent::ValueGenerated(ValueData { seq: 5, .. })));
    }
}
