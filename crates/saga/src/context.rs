//! Durable execution context shared by the orchestrator and its children.
//!
//! The context owns the execution's history writer and its decision
//! sequence. Every durable operation goes through here: markers, timers,
//! generated values, status tags, address resolution and cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common::ExecutionId;
use domain::{DomainEvent, Items, OrderInput, OrderOutput};
use history::{AppendOptions, HistoryEvent, HistoryStore, Version};
use tokio::sync::{Mutex, watch};

use crate::decision_log::{DecisionKind, DecisionLog};
use crate::error::{Result, SagaError, SagaFailure};
use crate::events::SagaEvent;
use crate::options::SagaOptions;
use crate::order_fulfillment::SAGA_TYPE;
use crate::progress::{ProgressReader, ProgressWriter, progress_channel_from};
use crate::query::{QUERY_ITEMS, QUERY_PROGRESS, QueryRegistry};
use crate::state::SagaPhase;
use crate::status::StatusPublisher;

#[derive(Debug, Default)]
struct AddressState {
    current: String,
    resolved: Option<String>,
}

/// Durable execution context for one saga execution.
pub struct SagaContext {
    execution_id: ExecutionId,
    input: OrderInput,
    options: SagaOptions,
    store: Arc<dyn HistoryStore>,
    status: Arc<dyn StatusPublisher>,
    decisions: DecisionLog,
    next_seq: AtomicU64,
    version: Mutex<Version>,
    phase: RwLock<SagaPhase>,
    progress: ProgressWriter,
    queries: QueryRegistry,
    items: Arc<RwLock<Items>>,
    cancel: watch::Sender<bool>,
    address: Mutex<AddressState>,
}

impl SagaContext {
    /// Records `SagaStarted` for a new execution and returns its context.
    #[tracing::instrument(skip(store, status, input, options), fields(order_id = %input.order_id))]
    pub async fn start(
        store: Arc<dyn HistoryStore>,
        status: Arc<dyn StatusPublisher>,
        execution_id: ExecutionId,
        input: OrderInput,
        options: SagaOptions,
    ) -> Result<Arc<Self>> {
        let started =
            SagaEvent::saga_started(execution_id, SAGA_TYPE, input.clone(), options.clone());
        let envelope = envelope(execution_id, &input.order_id, Version::first(), &started)?;
        let version = store
            .append(vec![envelope], AppendOptions::expect_new())
            .await?;

        let address = AddressState {
            current: input.address.clone(),
            resolved: None,
        };
        Ok(Arc::new(Self::new(
            execution_id,
            input,
            options,
            store,
            status,
            DecisionLog::default(),
            version,
            false,
            address,
            0,
        )))
    }

    /// Rebuilds the context of an existing execution from its history.
    ///
    /// The returned context replays recorded decisions before issuing new ones.
    #[tracing::instrument(skip(store, status))]
    pub async fn load(
        store: Arc<dyn HistoryStore>,
        status: Arc<dyn StatusPublisher>,
        execution_id: ExecutionId,
    ) -> Result<Arc<Self>> {
        let history = store.read_history(execution_id).await?;
        let Some(last) = history.last() else {
            return Err(SagaError::ExecutionNotFound(execution_id));
        };
        let version = last.version;

        let events = history
            .iter()
            .map(SagaEvent::from_history)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(SagaEvent::SagaStarted(started)) = events.first() else {
            return Err(SagaError::CorruptHistory(format!(
                "history of {execution_id} does not begin with SagaStarted"
            )));
        };
        let input = started.input.clone();
        let options = started.options.clone();

        let mut cancelled = false;
        let mut progress = 0;
        let mut address = AddressState {
            current: input.address.clone(),
            resolved: None,
        };
        for event in &events {
            match event {
                SagaEvent::CancelRequested(_) => cancelled = true,
                SagaEvent::ProgressUpdated(data) => progress = progress.max(data.progress),
                SagaEvent::AddressUpdateReceived(data) => address.current = data.address.clone(),
                SagaEvent::AddressResolved(data) => address.resolved = Some(data.address.clone()),
                _ => {}
            }
        }

        let decisions = DecisionLog::from_events(&events)?;
        tracing::debug!(decisions = decisions.len(), %version, "history loaded");

        Ok(Arc::new(Self::new(
            execution_id,
            input,
            options,
            store,
            status,
            decisions,
            version,
            cancelled,
            address,
            progress,
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        execution_id: ExecutionId,
        input: OrderInput,
        options: SagaOptions,
        store: Arc<dyn HistoryStore>,
        status: Arc<dyn StatusPublisher>,
        decisions: DecisionLog,
        version: Version,
        cancelled: bool,
        address: AddressState,
        restored_progress: u8,
    ) -> Self {
        let (progress, reader) = progress_channel_from(restored_progress);
        let items = Arc::new(RwLock::new(Items::default()));

        let queries = QueryRegistry::new();
        queries.register(QUERY_PROGRESS, move || serde_json::json!(reader.get()));
        let items_view = items.clone();
        queries.register(QUERY_ITEMS, move || {
            let items = items_view.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_value(&*items).unwrap_or(serde_json::Value::Null)
        });

        let (cancel, _) = watch::channel(cancelled);

        Self {
            execution_id,
            input,
            options,
            store,
            status,
            decisions,
            next_seq: AtomicU64::new(1),
            version: Mutex::new(version),
            phase: RwLock::new(SagaPhase::Started),
            progress,
            queries,
            items,
            cancel,
            address: Mutex::new(address),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn input(&self) -> &OrderInput {
        &self.input
    }

    pub fn options(&self) -> &SagaOptions {
        &self.options
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    pub fn phase(&self) -> SagaPhase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self) -> u8 {
        self.progress.get()
    }

    pub fn progress_reader(&self) -> ProgressReader {
        self.progress.reader()
    }

    /// Takes the next decision sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Appends one event at the next version.
    pub(crate) async fn append(&self, event: &SagaEvent) -> Result<Version> {
        let mut version = self.version.lock().await;
        let next = version.next();
        let envelope = envelope(self.execution_id, &self.input.order_id, next, event)?;
        *version = self
            .store
            .append(vec![envelope], AppendOptions::expect_version(*version))
            .await?;
        Ok(*version)
    }

    /// Returns the recorded decision at `seq`, or appends `event` if none.
    async fn record(&self, seq: u64, kind: DecisionKind, event: SagaEvent) -> Result<Option<&SagaEvent>> {
        if let Some(recorded) = self.decisions.marker(seq, kind)? {
            return Ok(Some(recorded));
        }
        self.append(&event).await?;
        Ok(None)
    }

    /// Moves the orchestrator to a new phase.
    pub async fn enter_phase(&self, to: SagaPhase) -> Result<()> {
        let from = self.phase();
        if !from.can_transition_to(to) {
            return Err(SagaError::InvalidTransition { from, to });
        }

        let seq = self.next_seq();
        let event = SagaEvent::phase_changed(seq, from, to);
        if let Some(SagaEvent::PhaseChanged(recorded)) =
            self.record(seq, DecisionKind::Phase, event).await?
            && recorded.to != to
        {
            return Err(SagaError::non_determinism(seq, to, recorded.to));
        }

        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = to;
        tracing::info!(execution_id = %self.execution_id, %from, %to, "phase changed");
        Ok(())
    }

    /// Commits a progress value. Readers see it once it is durable.
    pub async fn set_progress(&self, value: u8) -> Result<()> {
        let seq = self.next_seq();
        if let Some(SagaEvent::ProgressUpdated(recorded)) =
            self.decisions.marker(seq, DecisionKind::Progress)?
        {
            // The cell already holds the furthest recorded value.
            if recorded.progress != value {
                return Err(SagaError::non_determinism(seq, value, recorded.progress));
            }
            return Ok(());
        }

        self.progress.validate(value)?;
        self.append(&SagaEvent::progress_updated(seq, value)).await?;
        self.progress.set(value)?;
        tracing::debug!(execution_id = %self.execution_id, progress = value, "progress updated");
        Ok(())
    }

    /// Durable sleep. A recorded timer is not slept again; zero is a no-op.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Ok(());
        }

        let seq = self.next_seq();
        if self.decisions.marker(seq, DecisionKind::Timer)?.is_some() {
            return Ok(());
        }

        tokio::time::sleep(duration).await;
        self.append(&SagaEvent::timer_fired(seq, duration.as_millis() as u64))
            .await?;
        Ok(())
    }

    /// Generates a unique value once; replay returns the recorded value.
    pub async fn generate_unique_id(&self) -> Result<String> {
        let seq = self.next_seq();
        if let Some(SagaEvent::ValueGenerated(recorded)) =
            self.decisions.marker(seq, DecisionKind::Value)?
        {
            return Ok(recorded.value.clone());
        }

        let value = uuid::Uuid::new_v4().to_string();
        self.append(&SagaEvent::value_generated(seq, value.clone()))
            .await?;
        Ok(value)
    }

    /// Publishes a status tag. A publish failure is logged, never returned.
    ///
    /// Replay publishes recorded tags again; publishers upsert, so the
    /// visibility index converges on the latest value.
    pub async fn publish_status(&self, key: &str, value: &str) -> Result<()> {
        let seq = self.next_seq();
        let recorded = self.decisions.marker(seq, DecisionKind::Status)?;
        if let Some(SagaEvent::StatusPublished(recorded)) = recorded
            && (recorded.key != key || recorded.value != value)
        {
            return Err(SagaError::non_determinism(
                seq,
                format!("{key}={value}"),
                format!("{}={}", recorded.key, recorded.value),
            ));
        }

        let delivered = match self.status.publish(self.execution_id, key, value).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(execution_id = %self.execution_id, key, value, error = %err, "status publish failed");
                false
            }
        };

        if recorded.is_none() {
            self.append(&SagaEvent::status_published(seq, key, value, delivered))
                .await?;
        }
        Ok(())
    }

    /// Makes the fetched items visible to the items query.
    pub fn set_items(&self, items: Items) {
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = items;
    }

    /// Freezes the destination address. Later updates are rejected.
    pub async fn resolve_address(&self) -> Result<String> {
        let seq = self.next_seq();
        let mut address = self.address.lock().await;

        if let Some(SagaEvent::AddressResolved(recorded)) =
            self.decisions.marker(seq, DecisionKind::AddressResolved)?
        {
            address.resolved = Some(recorded.address.clone());
            return Ok(recorded.address.clone());
        }

        let resolved = address.current.clone();
        self.append(&SagaEvent::address_resolved(seq, resolved.clone()))
            .await?;
        address.resolved = Some(resolved.clone());
        tracing::info!(execution_id = %self.execution_id, address = %resolved, "address resolved");
        Ok(resolved)
    }

    /// Records a new destination address if shipping has not begun.
    pub async fn update_address(&self, new_address: String) -> Result<()> {
        let mut address = self.address.lock().await;
        if address.resolved.is_some() {
            return Err(SagaError::AddressLocked(self.execution_id));
        }

        self.append(&SagaEvent::address_update_received(new_address.clone()))
            .await?;
        tracing::info!(execution_id = %self.execution_id, address = %new_address, "address updated");
        address.current = new_address;
        Ok(())
    }

    /// Returns the address currently in effect.
    pub async fn current_address(&self) -> String {
        let address = self.address.lock().await;
        address
            .resolved
            .clone()
            .unwrap_or_else(|| address.current.clone())
    }

    /// Records a cancellation request. Repeated requests are no-ops.
    pub async fn request_cancel(&self, reason: Option<String>) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        self.append(&SagaEvent::cancel_requested(reason)).await?;
        self.cancel.send_replace(true);
        tracing::info!(execution_id = %self.execution_id, "cancellation requested");
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancellation.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Records successful completion. Replay returns the recorded output.
    pub async fn complete(&self, output: OrderOutput) -> Result<OrderOutput> {
        let seq = self.next_seq();
        match self.decisions.marker(seq, DecisionKind::Completion)? {
            Some(SagaEvent::SagaCompleted(recorded)) => Ok(recorded.output.clone()),
            Some(_) => Err(SagaError::non_determinism(seq, "SagaCompleted", "SagaFailed")),
            None => {
                self.append(&SagaEvent::saga_completed(seq, output.clone()))
                    .await?;
                Ok(output)
            }
        }
    }

    /// Records failure. Replay returns the recorded failure.
    pub async fn fail(&self, failure: SagaFailure) -> Result<SagaFailure> {
        let seq = self.next_seq();
        match self.decisions.marker(seq, DecisionKind::Completion)? {
            Some(SagaEvent::SagaFailed(recorded)) => Ok(recorded.failure.clone()),
            Some(_) => Err(SagaError::non_determinism(seq, "SagaFailed", "SagaCompleted")),
            None => {
                self.append(&SagaEvent::saga_failed(seq, failure.clone()))
                    .await?;
                Ok(failure)
            }
        }
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("execution_id", &self.execution_id)
            .field("order_id", &self.input.order_id)
            .field("phase", &self.phase())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

fn envelope(
    execution_id: ExecutionId,
    order_id: &str,
    version: Version,
    event: &SagaEvent,
) -> Result<HistoryEvent> {
    Ok(HistoryEvent::builder()
        .event_type(event.event_type())
        .execution_id(execution_id)
        .workflow_type(SAGA_TYPE)
        .version(version)
        .payload(event)?
        .metadata("order_id", serde_json::json!(order_id))
        .build())
}
