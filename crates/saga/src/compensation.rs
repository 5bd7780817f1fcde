//! Compensation stack for undoing completed steps.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::SagaContext;
use crate::decision_log::DecisionKind;
use crate::error::{Result, SagaError, StepError};
use crate::events::SagaEvent;
use crate::executor;
use crate::options::StepOptions;

/// An undo operation. Receives the input recorded at registration.
pub type UndoFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, std::result::Result<(), StepError>> + Send + Sync>;

/// The result of one undo operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    /// The forward step being undone.
    pub step: String,
    pub undo_step: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompensationOutcome {
    pub fn succeeded(step: impl Into<String>, undo_step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            undo_step: undo_step.into(),
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(
        step: impl Into<String>,
        undo_step: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step: step.into(),
            undo_step: undo_step.into(),
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// A registered undo operation.
#[derive(Clone)]
pub struct CompensationEntry {
    pub step: String,
    pub undo_step: String,
    pub input: serde_json::Value,
    undo: UndoFn,
}

impl std::fmt::Debug for CompensationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompensationEntry")
            .field("step", &self.step)
            .field("undo_step", &self.undo_step)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// Undo operations of completed steps, run last-in first-out.
#[derive(Debug, Default)]
pub struct CompensationRegistry {
    entries: Vec<CompensationEntry>,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the registered undo step names, most recent first.
    pub fn pending(&self) -> Vec<&str> {
        self.entries
            .iter()
            .rev()
            .map(|entry| entry.undo_step.as_str())
            .collect()
    }

    /// Pushes the undo operation for a step that just completed.
    pub async fn register<I, F, Fut>(
        &mut self,
        ctx: &SagaContext,
        step: &str,
        undo_step: &str,
        input: &I,
        undo: F,
    ) -> Result<()>
    where
        I: Serialize + ?Sized,
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), StepError>> + Send + 'static,
    {
        let input = serde_json::to_value(input)?;
        let seq = ctx.next_seq();

        match ctx.decisions().marker(seq, DecisionKind::CompensationRegistered)? {
            Some(SagaEvent::CompensationRegistered(recorded)) if recorded.undo_step != undo_step => {
                return Err(SagaError::non_determinism(seq, undo_step, &recorded.undo_step));
            }
            Some(_) => {}
            None => {
                ctx.append(&SagaEvent::compensation_registered(
                    seq,
                    step,
                    undo_step,
                    input.clone(),
                ))
                .await?;
            }
        }

        let undo: UndoFn = Arc::new(move |value| -> BoxFuture<'static, _> { Box::pin(undo(value)) });
        self.entries.push(CompensationEntry {
            step: step.to_string(),
            undo_step: undo_step.to_string(),
            input,
            undo,
        });
        Ok(())
    }

    /// Runs every registered undo operation, most recent first.
    ///
    /// A failed undo is recorded and compensation continues with the next
    /// one. Only a history error stops the run.
    #[tracing::instrument(skip(self, ctx), fields(execution_id = %ctx.execution_id(), pending = self.entries.len()))]
    pub async fn compensate_all(&mut self, ctx: &SagaContext) -> Result<Vec<CompensationOutcome>> {
        let options = StepOptions::compensation(ctx.options());
        let mut outcomes = Vec::with_capacity(self.entries.len());

        while let Some(entry) = self.entries.pop() {
            let seq = ctx.next_seq();
            let undo = entry.undo.clone();
            let input = entry.input.clone();

            let result: Result<()> =
                executor::execute(ctx, seq, &entry.undo_step, &entry.input, &options, || {
                    undo(input.clone())
                })
                .await;

            let outcome = match result {
                Ok(()) => {
                    tracing::info!(undo_step = %entry.undo_step, "compensation step completed");
                    CompensationOutcome::succeeded(&entry.step, &entry.undo_step)
                }
                Err(SagaError::Step(failure)) => {
                    tracing::error!(undo_step = %entry.undo_step, error = %failure, "compensation step failed");
                    CompensationOutcome::failed(&entry.step, &entry.undo_step, failure.to_string())
                }
                Err(other) => return Err(other),
            };

            record_outcome(ctx, &outcome).await?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

async fn record_outcome(ctx: &SagaContext, outcome: &CompensationOutcome) -> Result<()> {
    let label = if outcome.succeeded { "succeeded" } else { "failed" };
    let seq = ctx.next_seq();

    if ctx
        .decisions()
        .marker(seq, DecisionKind::CompensationOutcome)?
        .is_none()
    {
        let event = match &outcome.error {
            None => SagaEvent::compensation_step_completed(seq, &outcome.step, &outcome.undo_step),
            Some(error) => {
                SagaEvent::compensation_step_failed(seq, &outcome.step, &outcome.undo_step, error)
            }
        };
        ctx.append(&event).await?;
        metrics::counter!("saga_compensations_total", "outcome" => label).increment(1);
    }
    Ok(())
}
