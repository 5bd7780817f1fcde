//! Saga coordinator: starts, resumes and inspects saga executions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use common::ExecutionId;
use domain::{DomainError, OrderError, OrderInput, OrderOutput};
use futures_util::StreamExt;
use history::{HistoryEvent, HistoryQuery, HistoryStore, HistoryStoreExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::aggregate::SagaInstance;
use crate::context::SagaContext;
use crate::error::{Result, SagaError, SagaFailure};
use crate::events::SagaEvent;
use crate::options::SagaOptions;
use crate::order_fulfillment;
use crate::query::{QUERY_ITEMS, QUERY_PROGRESS};
use crate::services::OrderActivities;
use crate::status::{InMemoryStatusPublisher, StatusPublisher};

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed(OrderOutput),
    Failed(SagaFailure),
    /// The execution stopped without recording a result. It can be resumed.
    Crashed(String),
}

impl ExecutionOutcome {
    pub fn into_result(self) -> Result<OrderOutput> {
        match self {
            ExecutionOutcome::Completed(output) => Ok(output),
            ExecutionOutcome::Failed(failure) => Err(SagaError::Failed(failure)),
            ExecutionOutcome::Crashed(reason) => Err(SagaError::Crashed(reason)),
        }
    }
}

/// A started execution, as listed by [`SagaCoordinator::list_executions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: ExecutionId,
    pub order_id: String,
    pub started_at: DateTime<Utc>,
}

struct ExecutionHandle {
    ctx: Arc<SagaContext>,
    outcome: watch::Receiver<Option<ExecutionOutcome>>,
    task: AbortHandle,
}

impl ExecutionHandle {
    fn is_running(&self) -> bool {
        self.outcome.borrow().is_none() && !self.task.is_finished()
    }
}

/// Orchestrates order fulfillment saga executions.
///
/// Each execution runs as its own task. Its history is the source of truth:
/// a coordinator in a new process resumes an interrupted execution by
/// replaying that history, without invoking any recorded step again.
pub struct SagaCoordinator<S>
where
    S: HistoryStore + Clone + 'static,
{
    store: S,
    activities: OrderActivities,
    status: Arc<dyn StatusPublisher>,
    options: SagaOptions,
    executions: Arc<RwLock<HashMap<ExecutionId, Arc<ExecutionHandle>>>>,
}

impl<S> SagaCoordinator<S>
where
    S: HistoryStore + Clone + 'static,
{
    /// Creates a new saga coordinator with default options.
    pub fn new(store: S, activities: OrderActivities) -> Self {
        Self {
            store,
            activities,
            status: Arc::new(InMemoryStatusPublisher::new()),
            options: SagaOptions::default(),
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sets the options recorded for executions started from now on.
    pub fn with_options(mut self, options: SagaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_status_publisher(mut self, status: Arc<dyn StatusPublisher>) -> Self {
        self.status = status;
        self
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates the input, records the start and launches the execution.
    #[tracing::instrument(skip(self, input), fields(saga_type = order_fulfillment::SAGA_TYPE, order_id = %input.order_id))]
    pub async fn start_saga(&self, input: OrderInput) -> Result<ExecutionId> {
        input.validate().map_err(DomainError::from)?;

        let execution_id = ExecutionId::new();
        let ctx = SagaContext::start(
            Arc::new(self.store.clone()),
            self.status.clone(),
            execution_id,
            input,
            self.options.clone(),
        )
        .await?;

        metrics::counter!("saga_executions_total").increment(1);
        tracing::info!(%execution_id, "saga started");
        self.launch(ctx);
        Ok(execution_id)
    }

    /// Starts an execution and waits for its result.
    pub async fn execute_saga(&self, input: OrderInput) -> Result<OrderOutput> {
        let execution_id = self.start_saga(input).await?;
        self.wait_for_result(execution_id).await
    }

    fn launch(&self, ctx: Arc<SagaContext>) {
        let execution_id = ctx.execution_id();
        let (tx, rx) = watch::channel(None);
        let activities = self.activities.clone();
        let run_ctx = ctx.clone();

        let task = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let outcome = match order_fulfillment::run(run_ctx, activities).await {
                Ok(output) => {
                    metrics::counter!("saga_completed").increment(1);
                    ExecutionOutcome::Completed(output)
                }
                Err(SagaError::Failed(failure)) => {
                    metrics::counter!("saga_failed").increment(1);
                    tracing::warn!(%execution_id, %failure, "saga failed");
                    ExecutionOutcome::Failed(failure)
                }
                Err(err) => {
                    tracing::error!(%execution_id, error = %err, "saga execution crashed");
                    ExecutionOutcome::Crashed(err.to_string())
                }
            };
            metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
            tx.send_replace(Some(outcome));
        });

        let handle = Arc::new(ExecutionHandle {
            ctx,
            outcome: rx,
            task: task.abort_handle(),
        });
        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id, handle);
    }

    fn handle(&self, execution_id: ExecutionId) -> Option<Arc<ExecutionHandle>> {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned()
    }

    /// Returns the handle of an execution that is running in this process.
    async fn running(&self, execution_id: ExecutionId) -> Result<Arc<ExecutionHandle>> {
        if let Some(handle) = self.handle(execution_id)
            && handle.is_running()
        {
            return Ok(handle);
        }
        if self.store.execution_exists(execution_id).await? {
            return Err(SagaError::ExecutionNotRunning(execution_id));
        }
        Err(SagaError::ExecutionNotFound(execution_id))
    }

    /// Waits for an execution's result.
    ///
    /// Executions not running in this process answer from their recorded
    /// result, or fail with `ExecutionNotRunning` if none was recorded.
    pub async fn wait_for_result(&self, execution_id: ExecutionId) -> Result<OrderOutput> {
        let Some(handle) = self.handle(execution_id) else {
            return match self.recorded_outcome(execution_id).await? {
                Some(outcome) => outcome.into_result(),
                None => Err(SagaError::ExecutionNotRunning(execution_id)),
            };
        };

        let mut rx = handle.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome
            .unwrap_or_else(|| ExecutionOutcome::Crashed("execution task ended without a result".to_string()))
            .into_result()
    }

    /// Returns the result if the execution has finished, without waiting.
    pub async fn outcome(&self, execution_id: ExecutionId) -> Result<Option<ExecutionOutcome>> {
        if let Some(handle) = self.handle(execution_id) {
            let outcome = handle.outcome.borrow().clone();
            if outcome.is_some() || !handle.task.is_finished() {
                return Ok(outcome);
            }
            return Ok(Some(ExecutionOutcome::Crashed(
                "execution task ended without a result".to_string(),
            )));
        }
        self.recorded_outcome(execution_id).await
    }

    async fn recorded_outcome(&self, execution_id: ExecutionId) -> Result<Option<ExecutionOutcome>> {
        let saga = self.get_saga(execution_id).await?;
        if let Some(output) = saga.output() {
            return Ok(Some(ExecutionOutcome::Completed(output.clone())));
        }
        Ok(saga.failure().cloned().map(ExecutionOutcome::Failed))
    }

    /// Returns the current progress. Never blocks on the execution.
    pub async fn progress(&self, execution_id: ExecutionId) -> Result<u8> {
        if let Some(handle) = self.handle(execution_id) {
            return Ok(handle.ctx.progress());
        }
        Ok(self.get_saga(execution_id).await?.progress())
    }

    /// Runs a named query against an execution.
    ///
    /// Executions not loaded in this process answer the built-in queries
    /// from their history.
    pub async fn query(&self, execution_id: ExecutionId, name: &str) -> Result<serde_json::Value> {
        if let Some(handle) = self.handle(execution_id) {
            return handle.ctx.queries().query(name);
        }

        let saga = self.get_saga(execution_id).await?;
        match name {
            QUERY_PROGRESS => Ok(serde_json::json!(saga.progress())),
            QUERY_ITEMS => Ok(serde_json::to_value(saga.items())?),
            _ => Err(SagaError::UnknownQuery(name.to_string())),
        }
    }

    /// Requests cancellation of a running execution.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, execution_id: ExecutionId, reason: Option<String>) -> Result<()> {
        let handle = self.running(execution_id).await?;
        handle.ctx.request_cancel(reason).await
    }

    /// Changes the destination address of a running execution.
    ///
    /// Fails with `AddressLocked` once shipping has begun.
    #[tracing::instrument(skip(self))]
    pub async fn update_address(&self, execution_id: ExecutionId, address: String) -> Result<()> {
        if address.trim().is_empty() {
            return Err(DomainError::from(OrderError::AddressRequired).into());
        }
        let handle = self.running(execution_id).await?;
        handle.ctx.update_address(address).await
    }

    /// Resumes an execution by replaying its history.
    ///
    /// A finished execution replays to its recorded result without invoking
    /// any step. Resuming a running execution is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, execution_id: ExecutionId) -> Result<()> {
        if self
            .handle(execution_id)
            .is_some_and(|handle| handle.is_running())
        {
            return Ok(());
        }

        let ctx = SagaContext::load(
            Arc::new(self.store.clone()),
            self.status.clone(),
            execution_id,
        )
        .await?;
        tracing::info!(%execution_id, decisions = ctx.decisions().len(), "saga resumed");
        self.launch(ctx);
        Ok(())
    }

    /// Resumes every execution that has no recorded result.
    ///
    /// Returns the resumed executions in the order they were started. An
    /// execution whose history cannot be replayed is logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<ExecutionId>> {
        let mut started = Vec::new();
        let mut finished = HashSet::new();

        let mut events = self.store.stream_all().await?;
        while let Some(event) = events.next().await {
            let event = event?;
            match event.event_type.as_str() {
                "SagaStarted" => started.push(event.execution_id),
                "SagaCompleted" | "SagaFailed" => {
                    finished.insert(event.execution_id);
                }
                _ => {}
            }
        }

        let mut resumed = Vec::new();
        for execution_id in started.into_iter().filter(|id| !finished.contains(id)) {
            match self.resume(execution_id).await {
                Ok(()) => resumed.push(execution_id),
                Err(err) => {
                    tracing::error!(%execution_id, error = %err, "execution could not be resumed");
                }
            }
        }

        tracing::info!(recovered = resumed.len(), "incomplete executions resumed");
        Ok(resumed)
    }

    /// Loads the saga view of an execution from its history.
    pub async fn get_saga(&self, execution_id: ExecutionId) -> Result<SagaInstance> {
        let history = self.store.read_history(execution_id).await?;
        if history.is_empty() {
            return Err(SagaError::ExecutionNotFound(execution_id));
        }
        SagaInstance::from_history(&history)
    }

    /// Returns an execution's raw history narrowed by `filter`.
    ///
    /// The filter's execution id is always replaced by `execution_id`.
    pub async fn history(
        &self,
        execution_id: ExecutionId,
        filter: HistoryQuery,
    ) -> Result<Vec<HistoryEvent>> {
        if !self.store.execution_exists(execution_id).await? {
            return Err(SagaError::ExecutionNotFound(execution_id));
        }
        Ok(self.store.query(filter.execution_id(execution_id)).await?)
    }

    /// Lists every started execution, oldest first.
    pub async fn list_executions(&self) -> Result<Vec<ExecutionSummary>> {
        self.store
            .get_events_by_type("SagaStarted")
            .await?
            .iter()
            .map(|event| match SagaEvent::from_history(event)? {
                SagaEvent::SagaStarted(data) => Ok(ExecutionSummary {
                    execution_id: data.execution_id,
                    order_id: data.input.order_id,
                    started_at: data.started_at,
                }),
                other => Err(SagaError::CorruptHistory(format!(
                    "SagaStarted event holds {other:?}"
                ))),
            })
            .collect()
    }

    /// Returns the number of executions running in this process.
    pub fn running_count(&self) -> usize {
        self.executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| handle.is_running())
            .count()
    }

    /// Stops every execution task. Their histories stay resumable.
    pub fn shutdown(&self) {
        let mut executions = self
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in executions.values() {
            handle.task.abort();
        }
        tracing::info!(executions = executions.len(), "saga coordinator stopped");
        executions.clear();
    }
}

impl<S> std::fmt::Debug for SagaCoordinator<S>
where
    S: HistoryStore + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCoordinator")
            .field("options", &self.options)
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}
