//! Replay index over an execution's recorded decisions.
//!
//! Every durable operation the orchestrator issues (step, sleep, generated
//! value, marker) takes the next number from a deterministic sequence. On
//! replay the same code asks for the same numbers, and the log answers with
//! what was recorded instead of running the operation again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::events::{SagaEvent, StepRecord};

/// The kind of decision recorded under a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionKind {
    Phase,
    Progress,
    Status,
    Step,
    CompensationRegistered,
    CompensationOutcome,
    Timer,
    Value,
    AddressResolved,
    Completion,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
enum Decision {
    Marker(SagaEvent),
    Step {
        step_name: String,
        attempts: Vec<StepRecord>,
    },
}

impl Decision {
    fn kind(&self) -> DecisionKind {
        match self {
            Decision::Marker(event) => event.decision_kind().unwrap_or(DecisionKind::Phase),
            Decision::Step { .. } => DecisionKind::Step,
        }
    }
}

/// Recorded decisions keyed by sequence number.
#[derive(Debug, Clone, Default)]
pub struct DecisionLog {
    decisions: HashMap<u64, Decision>,
}

impl DecisionLog {
    /// Builds the log from an execution's events in history order.
    ///
    /// Fails if two markers share a sequence number or a step's attempts are
    /// not numbered 1, 2, 3, ...
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SagaEvent>) -> Result<Self> {
        let mut decisions: HashMap<u64, Decision> = HashMap::new();

        for event in events {
            let Some(seq) = event.seq() else {
                continue;
            };

            if let SagaEvent::StepAttempted(record) = event {
                let entry = decisions.entry(seq).or_insert_with(|| Decision::Step {
                    step_name: record.step_name.clone(),
                    attempts: Vec::new(),
                });
                let Decision::Step {
                    step_name,
                    attempts,
                } = entry
                else {
                    return Err(SagaError::CorruptHistory(format!(
                        "sequence {seq} holds both a marker and a step attempt"
                    )));
                };
                if *step_name != record.step_name {
                    return Err(SagaError::CorruptHistory(format!(
                        "sequence {seq} holds attempts of '{step_name}' and '{}'",
                        record.step_name
                    )));
                }
                let expected = attempts.len() as u32 + 1;
                if record.attempt != expected {
                    return Err(SagaError::CorruptHistory(format!(
                        "sequence {seq} attempt {} recorded where {expected} was expected",
                        record.attempt
                    )));
                }
                attempts.push(record.clone());
                continue;
            }

            if decisions
                .insert(seq, Decision::Marker(event.clone()))
                .is_some()
            {
                return Err(SagaError::CorruptHistory(format!(
                    "sequence {seq} recorded twice"
                )));
            }
        }

        Ok(Self { decisions })
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Returns the highest recorded sequence number.
    pub fn max_seq(&self) -> Option<u64> {
        self.decisions.keys().copied().max()
    }

    /// Returns the marker recorded at `seq`, or None if nothing was recorded.
    ///
    /// A decision of another kind at `seq` means the orchestrator diverged
    /// from its history.
    pub fn marker(&self, seq: u64, kind: DecisionKind) -> Result<Option<&SagaEvent>> {
        match self.decisions.get(&seq) {
            None => Ok(None),
            Some(Decision::Marker(event)) if event.decision_kind() == Some(kind) => Ok(Some(event)),
            Some(other) => Err(SagaError::kind_mismatch(seq, kind, other.kind())),
        }
    }

    /// Returns the attempts recorded for the step at `seq` (empty if none).
    pub fn step_attempts(&self, seq: u64, step_name: &str) -> Result<&[StepRecord]> {
        match self.decisions.get(&seq) {
            None => Ok(&[]),
            Some(Decision::Step {
                step_name: recorded,
                attempts,
            }) => {
                if recorded != step_name {
                    return Err(SagaError::non_determinism(seq, step_name, recorded));
                }
                Ok(attempts)
            }
            Some(other) => Err(SagaError::kind_mismatch(seq, DecisionKind::Step, other.kind())),
        }
    }
}
