//! Saga error types.

use common::ExecutionId;
use domain::DomainError;
use history::HistoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compensation::CompensationOutcome;
use crate::decision_log::DecisionKind;
use crate::state::SagaPhase;

/// Failure reported by an activity for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Transient failure; the executor retries per policy.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Business rejection or malformed input; never retried.
    #[error("terminal: {0}")]
    Terminal(String),
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StepError::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        StepError::Terminal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Retryable(_))
    }

    /// Returns the message without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            StepError::Retryable(m) | StepError::Terminal(m) => m,
        }
    }
}

/// How a step ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Terminal,
    RetriesExhausted,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Terminal => "terminal failure",
            FailureKind::RetriesExhausted => "retries exhausted",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The final outcome of a step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    #[error("step '{step}' failed terminally after {attempts} attempt(s): {error}")]
    Terminal {
        step: String,
        error: String,
        attempts: u32,
    },

    #[error("step '{step}' exhausted {attempts} attempt(s): {error}")]
    RetriesExhausted {
        step: String,
        error: String,
        attempts: u32,
    },

    #[error("step '{step}' cancelled after {attempts} attempt(s)")]
    Cancelled { step: String, attempts: u32 },
}

impl StepFailure {
    pub fn step(&self) -> &str {
        match self {
            StepFailure::Terminal { step, .. }
            | StepFailure::RetriesExhausted { step, .. }
            | StepFailure::Cancelled { step, .. } => step,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StepFailure::Terminal { .. } => FailureKind::Terminal,
            StepFailure::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            StepFailure::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            StepFailure::Terminal { error, .. } | StepFailure::RetriesExhausted { error, .. } => {
                error.clone()
            }
            StepFailure::Cancelled { .. } => "cancellation requested".to_string(),
        }
    }
}

/// The terminal error of a failed saga, as reported to the caller and
/// recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailure {
    /// The phase the failing step was trying to reach.
    pub phase: SagaPhase,
    pub step: String,
    pub kind: FailureKind,
    pub reason: String,
    /// Undo outcomes, in the order they ran.
    pub compensations: Vec<CompensationOutcome>,
}

impl SagaFailure {
    pub fn new(phase: SagaPhase, failure: &StepFailure) -> Self {
        Self {
            phase,
            step: failure.step().to_string(),
            kind: failure.kind(),
            reason: failure.reason(),
            compensations: Vec::new(),
        }
    }

    /// Returns the undo operations that did not succeed.
    pub fn compensation_failures(&self) -> impl Iterator<Item = &CompensationOutcome> {
        self.compensations.iter().filter(|c| !c.succeeded)
    }
}

impl std::fmt::Display for SagaFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed at step '{}' ({}): {}",
            self.phase, self.step, self.kind, self.reason
        )?;
        let failed = self.compensation_failures().count();
        if failed > 0 {
            write!(f, " [{failed} compensation(s) failed]")?;
        }
        Ok(())
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step failed; the orchestrator turns this into an abort.
    #[error("{0}")]
    Step(StepFailure),

    /// The saga ended in the Failed phase.
    #[error("Saga failed: {0}")]
    Failed(SagaFailure),

    /// No history exists for the execution.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    /// The execution exists but is not running in this process.
    #[error("Execution not running: {0}")]
    ExecutionNotRunning(ExecutionId),

    /// The execution stopped without recording a result.
    #[error("Execution crashed: {0}")]
    Crashed(String),

    /// No query handler is registered under this name.
    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    /// Replayed logic issued a different decision than the one recorded.
    #[error("Non-deterministic replay at sequence {seq}: expected {expected}, found {found}")]
    NonDeterminism {
        seq: u64,
        expected: String,
        found: String,
    },

    /// Shipping has begun; the destination can no longer change.
    #[error("Address is locked for execution {0}")]
    AddressLocked(ExecutionId),

    /// The orchestrator attempted an illegal phase change.
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: SagaPhase, to: SagaPhase },

    /// Progress must be one of 0/25/50/75/100 and never decrease.
    #[error("Invalid progress value: {value} (current {current})")]
    InvalidProgress { value: u8, current: u8 },

    /// Stored history cannot be interpreted.
    #[error("Corrupt history: {0}")]
    CorruptHistory(String),

    /// A spawned task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// History store error.
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub(crate) fn non_determinism(
        seq: u64,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        SagaError::NonDeterminism {
            seq,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub(crate) fn kind_mismatch(seq: u64, expected: DecisionKind, found: DecisionKind) -> Self {
        Self::non_determinism(seq, expected, found)
    }
}

impl From<StepFailure> for SagaError {
    fn from(failure: StepFailure) -> Self {
        SagaError::Step(failure)
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
