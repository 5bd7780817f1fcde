//! Step executor: timeout, retry with backoff, and recorded attempts.
//!
//! Every attempt is appended to history before the next one starts, so a
//! resumed execution continues from the last recorded attempt instead of
//! invoking a completed step again.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::SagaContext;
use crate::error::{Result, StepError, StepFailure};
use crate::events::{SagaEvent, StepOutcome, StepRecord};
use crate::options::StepOptions;

/// Runs `op` as the step recorded under `seq`.
///
/// Replays recorded attempts first. A recorded success is returned without
/// calling `op`; a recorded terminal failure, cancellation or exhausted retry
/// is returned as the same [`StepFailure`]. Errors other than
/// [`SagaError::Step`](crate::SagaError::Step) mean the history could not be
/// read or written and the execution must stop.
#[tracing::instrument(skip(ctx, input, options, op), fields(execution_id = %ctx.execution_id()))]
pub async fn execute<I, T, F, Fut>(
    ctx: &SagaContext,
    seq: u64,
    step: &str,
    input: &I,
    options: &StepOptions,
    mut op: F,
) -> Result<T>
where
    I: Serialize + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, StepError>>,
{
    let recorded = ctx.decisions().step_attempts(seq, step)?;

    let mut attempt = 0;
    let mut first_attempt_at: Option<DateTime<Utc>> = None;
    for record in recorded {
        attempt = record.attempt;
        first_attempt_at.get_or_insert(record.first_attempt_at);
        match &record.outcome {
            StepOutcome::Succeeded { output } => {
                return Ok(serde_json::from_value(output.clone())?);
            }
            StepOutcome::Terminal { error } => {
                return Err(terminal(step, error, attempt).into());
            }
            StepOutcome::Cancelled => {
                return Err(cancelled(step, attempt - 1).into());
            }
            StepOutcome::Retryable { error } if record.backoff_ms.is_none() => {
                return Err(exhausted(step, error, attempt).into());
            }
            StepOutcome::Retryable { .. } => {}
        }
    }

    if attempt > 0 {
        tracing::debug!(step, attempt, "resuming step after recorded attempts");
    }

    let attempts = Attempts {
        ctx,
        seq,
        step,
        input: serde_json::to_value(input)?,
        first_attempt_at: first_attempt_at.unwrap_or_else(Utc::now),
    };
    let mut backoff = recorded
        .last()
        .and_then(|record| record.backoff_ms)
        .map(Duration::from_millis);

    loop {
        if let Some(delay) = backoff.take()
            && !wait_backoff(ctx, delay, options.cancellable).await
        {
            attempts.record(attempt + 1, StepOutcome::Cancelled, None).await?;
            return Err(cancelled(step, attempt).into());
        }

        if options.cancellable && ctx.is_cancelled() {
            attempts.record(attempt + 1, StepOutcome::Cancelled, None).await?;
            return Err(cancelled(step, attempt).into());
        }

        attempt += 1;
        let result = match tokio::time::timeout(options.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StepError::retryable(format!(
                "attempt timed out after {}ms",
                options.timeout.as_millis()
            ))),
        };
        metrics::counter!("saga_step_attempts_total", "step" => step.to_string()).increment(1);

        match result {
            Ok(output) => {
                let value = serde_json::to_value(&output)?;
                attempts
                    .record(attempt, StepOutcome::Succeeded { output: value }, None)
                    .await?;
                tracing::info!(step, attempt, "saga step completed");
                return Ok(output);
            }
            Err(StepError::Terminal(error)) => {
                attempts
                    .record(attempt, StepOutcome::Terminal { error: error.clone() }, None)
                    .await?;
                tracing::warn!(step, attempt, %error, "saga step failed terminally");
                return Err(terminal(step, &error, attempt).into());
            }
            Err(StepError::Retryable(error)) => {
                if !options.retry.allows_retry_after(attempt) {
                    attempts
                        .record(attempt, StepOutcome::Retryable { error: error.clone() }, None)
                        .await?;
                    tracing::warn!(step, attempt, %error, "saga step exhausted retries");
                    return Err(exhausted(step, &error, attempt).into());
                }

                let delay = options.retry.delay_for_attempt(attempt);
                attempts
                    .record(
                        attempt,
                        StepOutcome::Retryable { error: error.clone() },
                        Some(delay.as_millis() as u64),
                    )
                    .await?;
                tracing::warn!(step, attempt, %error, backoff_ms = delay.as_millis() as u64, "saga step failed, retrying");
                backoff = Some(delay);
            }
        }
    }
}

/// Waits out a backoff. Returns false if cancellation cut it short.
async fn wait_backoff(ctx: &SagaContext, delay: Duration, cancellable: bool) -> bool {
    if !cancellable {
        tokio::time::sleep(delay).await;
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = ctx.cancelled() => false,
    }
}

struct Attempts<'a> {
    ctx: &'a SagaContext,
    seq: u64,
    step: &'a str,
    input: serde_json::Value,
    first_attempt_at: DateTime<Utc>,
}

impl Attempts<'_> {
    async fn record(&self, attempt: u32, outcome: StepOutcome, backoff_ms: Option<u64>) -> Result<()> {
        let record = StepRecord {
            seq: self.seq,
            step_name: self.step.to_string(),
            input: self.input.clone(),
            attempt,
            outcome,
            first_attempt_at: self.first_attempt_at,
            recorded_at: Utc::now(),
            backoff_ms,
        };
        self.ctx.append(&SagaEvent::StepAttempted(record)).await?;
        Ok(())
    }
}

fn terminal(step: &str, error: &str, attempts: u32) -> StepFailure {
    StepFailure::Terminal {
        step: step.to_string(),
        error: error.to_string(),
        attempts,
    }
}

fn exhausted(step: &str, error: &str, attempts: u32) -> StepFailure {
    StepFailure::RetriesExhausted {
        step: step.to_string(),
        error: error.to_string(),
        attempts,
    }
}

fn cancelled(step: &str, attempts: u32) -> StepFailure {
    StepFailure::Cancelled {
        step: step.to_string(),
        attempts,
    }
}
