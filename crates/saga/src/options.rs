//! Execution options, snapshotted into history when a saga starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Tuning for one saga execution.
///
/// A resumed execution always uses the options recorded at start, never the
/// current process's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaOptions {
    /// Bound on a single step attempt.
    pub step_timeout: Duration,
    /// Policy for forward steps.
    pub retry: RetryPolicy,
    /// Policy for undo operations during compensation.
    pub compensation_retry: RetryPolicy,
    /// Pause after each progress checkpoint so readers can observe it.
    pub checkpoint_pauses: bool,
    /// Maximum concurrently running shipping children. `None` is unbounded.
    pub fan_out_limit: Option<usize>,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            compensation_retry: RetryPolicy::bounded(5),
            checkpoint_pauses: true,
            fan_out_limit: None,
        }
    }
}

/// Per-invocation options for the step executor.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Whether a cancellation request stops this step between attempts.
    pub cancellable: bool,
}

impl StepOptions {
    /// Options for forward steps.
    pub fn forward(options: &SagaOptions) -> Self {
        Self {
            timeout: options.step_timeout,
            retry: options.retry.clone(),
            cancellable: true,
        }
    }

    /// Options for undo operations. Compensation is never cancelled.
    pub fn compensation(options: &SagaOptions) -> Self {
        Self {
            timeout: options.step_timeout,
            retry: options.compensation_retry.clone(),
            cancellable: false,
        }
    }
}
