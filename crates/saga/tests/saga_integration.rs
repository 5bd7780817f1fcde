//! Integration tests for the durable order fulfillment saga.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::ExecutionId;
use domain::{Item, Items, OrderInput};
use history::{
    AppendOptions, HistoryError, HistoryEvent, HistoryQuery, HistoryStore, HistoryStream,
    InMemoryHistoryStore, Version,
};
use saga::order_fulfillment::{
    STATUS_COMPENSATING, STATUS_ORDER_COMPLETED, STATUS_ORDER_FAILED, STEP_CHARGE_CUSTOMER,
    STEP_GET_ITEMS, STEP_PREPARE_SHIPMENT, STEP_REFUND_CUSTOMER, STEP_SHIP_ORDER,
    STEP_UNDO_PREPARE_SHIPMENT,
};
use saga::{
    CompensationOutcome, ExecutionOutcome, FailureKind, FailurePlan, InMemoryActivities,
    InMemoryStatusPublisher, QUERY_ITEMS, QUERY_PROGRESS, SagaCoordinator, SagaError, SagaEvent,
    SagaFailure, SagaOptions, SagaPhase, STATUS_KEY,
};

struct TestHarness {
    store: InMemoryHistoryStore,
    status: InMemoryStatusPublisher,
    services: InMemoryActivities,
    coordinator: SagaCoordinator<InMemoryHistoryStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryHistoryStore::new();
        let status = InMemoryStatusPublisher::new();
        let services = InMemoryActivities::new();
        let coordinator = SagaCoordinator::new(store.clone(), services.activities())
            .with_status_publisher(Arc::new(status.clone()));

        Self {
            store,
            status,
            services,
            coordinator,
        }
    }

    /// A coordinator over the same history with fresh services, as after a restart.
    fn restart(&self) -> (SagaCoordinator<InMemoryHistoryStore>, InMemoryActivities) {
        let services = InMemoryActivities::new();
        let coordinator = SagaCoordinator::new(self.store.clone(), services.activities())
            .with_status_publisher(Arc::new(self.status.clone()));
        (coordinator, services)
    }

    async fn expect_failure(&self, id: ExecutionId) -> SagaFailure {
        match self.coordinator.wait_for_result(id).await {
            Err(SagaError::Failed(failure)) => failure,
            other => panic!("expected a failed saga, got {other:?}"),
        }
    }
}

fn order_a1() -> OrderInput {
    OrderInput::new("A1", "1 Main St").with_items(Items::new(vec![
        Item::new(654300, "Table Top", 1),
        Item::new(654321, "Table Legs", 2),
        Item::new(654322, "Keypad", 1),
    ]))
}

/// Stops accepting appends once an attempt of the given step has been stored.
#[derive(Clone)]
struct CrashingHistoryStore {
    inner: InMemoryHistoryStore,
    crash_after_step: &'static str,
    crashed: Arc<AtomicBool>,
}

impl CrashingHistoryStore {
    fn new(inner: InMemoryHistoryStore, crash_after_step: &'static str) -> Self {
        Self {
            inner,
            crash_after_step,
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl HistoryStore for CrashingHistoryStore {
    async fn append(
        &self,
        events: Vec<HistoryEvent>,
        options: AppendOptions,
    ) -> history::Result<Version> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable("process killed".to_string()));
        }
        let crash = events.iter().any(|event| {
            event.event_type == "StepAttempted"
                && event.payload["data"]["step_name"] == self.crash_after_step
        });
        let version = self.inner.append(events, options).await?;
        if crash {
            self.crashed.store(true, Ordering::SeqCst);
        }
        Ok(version)
    }

    async fn read_history(&self, execution_id: ExecutionId) -> history::Result<Vec<HistoryEvent>> {
        self.inner.read_history(execution_id).await
    }

    async fn query(&self, query: HistoryQuery) -> history::Result<Vec<HistoryEvent>> {
        self.inner.query(query).await
    }

    async fn get_events_by_type(&self, event_type: &str) -> history::Result<Vec<HistoryEvent>> {
        self.inner.get_events_by_type(event_type).await
    }

    async fn stream_all(&self) -> history::Result<HistoryStream> {
        self.inner.stream_all().await
    }

    async fn current_version(&self, execution_id: ExecutionId) -> history::Result<Option<Version>> {
        self.inner.current_version(execution_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_full_order_fulfillment() {
    let h = TestHarness::new();

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    let output = h.coordinator.wait_for_result(id).await.unwrap();

    assert_eq!(output.address, "1 Main St");
    assert!(uuid::Uuid::parse_str(&output.tracking_id).is_ok());
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 100);

    let saga = h.coordinator.get_saga(id).await.unwrap();
    assert_eq!(saga.phase(), SagaPhase::Completed);
    assert_eq!(saga.progress_history(), &[25, 50, 75, 100]);
    assert_eq!(saga.tracking_id(), Some(output.tracking_id.as_str()));
    assert_eq!(
        saga.status_tags(),
        &[
            "Get Items",
            "Check Fraud",
            "Prepare Shipment",
            "Charge Customer",
            "Ship Order",
            "Order Completed"
        ]
    );
    assert!(saga.compensations().is_empty());

    let mut shipped = h.services.shipping.shipped_items();
    shipped.sort();
    assert_eq!(shipped, vec![654300, 654321, 654322]);
    assert_eq!(h.services.payment.charge_count(), 1);
    assert_eq!(
        &h.services.journal.calls()[..4],
        &["GetItems", "CheckFraud", "PrepareShipment", "ChargeCustomer"]
    );
    assert_eq!(h.status.find(STATUS_KEY, STATUS_ORDER_COMPLETED), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_pauses() {
    let h = TestHarness::new();

    let start = tokio::time::Instant::now();
    h.coordinator.execute_saga(order_a1()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(6));
    assert!(elapsed < Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_fraud_failure_runs_no_compensation() {
    let h = TestHarness::new();
    h.services.fraud.flag_order("A1");

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    let failure = h.expect_failure(id).await;

    assert_eq!(failure.phase, SagaPhase::FraudChecked);
    assert_eq!(failure.kind, FailureKind::Terminal);
    assert!(failure.compensations.is_empty());
    assert_eq!(h.services.journal.count(STEP_UNDO_PREPARE_SHIPMENT), 0);
    assert_eq!(h.services.journal.count(STEP_REFUND_CUSTOMER), 0);
    assert_eq!(h.services.journal.count(STEP_PREPARE_SHIPMENT), 0);
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 0);
    assert_eq!(
        h.status.tag(id, STATUS_KEY).as_deref(),
        Some(STATUS_ORDER_FAILED)
    );

    let saga = h.coordinator.get_saga(id).await.unwrap();
    assert_eq!(saga.phase(), SagaPhase::Failed);
    assert!(!saga.status_tags().iter().any(|t| t == STATUS_COMPENSATING));
}

#[tokio::test(start_paused = true)]
async fn test_shipment_failure_refunds_before_undo() {
    let h = TestHarness::new();
    h.services
        .shipping
        .set_item_plan(654321, FailurePlan::fail_terminally("address rejected"));
    h.services
        .shipping
        .set_item_plan(654322, FailurePlan::fail_times(5));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    let failure = h.expect_failure(id).await;

    assert_eq!(failure.phase, SagaPhase::ItemsShipped);
    assert_eq!(failure.reason, "address rejected");
    assert!(failure.to_string().contains("ItemsShipped"));
    assert_eq!(
        failure.compensations,
        vec![
            CompensationOutcome::succeeded(STEP_CHARGE_CUSTOMER, STEP_REFUND_CUSTOMER),
            CompensationOutcome::succeeded(STEP_PREPARE_SHIPMENT, STEP_UNDO_PREPARE_SHIPMENT),
        ]
    );

    let journal = &h.services.journal;
    assert_eq!(journal.count(STEP_REFUND_CUSTOMER), 1);
    assert_eq!(journal.count(STEP_UNDO_PREPARE_SHIPMENT), 1);
    assert!(journal.position(STEP_REFUND_CUSTOMER) < journal.position(STEP_UNDO_PREPARE_SHIPMENT));

    // The retrying sibling finished before compensation started.
    assert_eq!(h.services.shipping.call_count(654322), 6);
    let calls = journal.calls();
    let last_ship = calls.iter().rposition(|c| c.starts_with("ShipOrder")).unwrap();
    assert!(last_ship < journal.position(STEP_REFUND_CUSTOMER).unwrap());
    assert!(h.services.shipping.shipped_items().contains(&654322));

    let saga = h.coordinator.get_saga(id).await.unwrap();
    assert_eq!(saga.phase(), SagaPhase::Failed);
    assert_eq!(saga.progress(), 75);
    assert!(saga.status_tags().iter().any(|t| t == STATUS_COMPENSATING));
    assert_eq!(h.services.payment.payment_count(), 0);
    assert!(!h.services.shipment.is_prepared("A1"));
}

#[tokio::test(start_paused = true)]
async fn test_compensation_failure_does_not_replace_original_error() {
    let h = TestHarness::new();
    h.services.shipping.set_fail_on_ship(true);
    h.services
        .payment
        .set_refund_plan(FailurePlan::fail_terminally("refund gateway down"));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    let failure = h.expect_failure(id).await;

    assert_eq!(failure.reason, "Shipping unavailable");
    assert_eq!(failure.compensations.len(), 2);
    assert!(!failure.compensations[0].succeeded);
    assert!(failure.compensations[1].succeeded);
    assert_eq!(failure.compensation_failures().count(), 1);
    assert_eq!(h.services.shipment.undo_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_during_retry_is_last_committed_value() {
    let h = TestHarness::new();
    h.services
        .payment
        .set_charge_plan(FailurePlan::fail_times(3));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(h.services.payment.charge_count(), 1);
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 25);
    assert_eq!(h.coordinator.query(id, QUERY_PROGRESS).await.unwrap(), 25);
    assert!(h.coordinator.outcome(id).await.unwrap().is_none());

    h.coordinator.wait_for_result(id).await.unwrap();
    assert_eq!(h.services.payment.charge_count(), 4);
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 100);

    let saga = h.coordinator.get_saga(id).await.unwrap();
    let backoffs: Vec<_> = saga
        .attempts_of(STEP_CHARGE_CUSTOMER)
        .map(|r| r.backoff_ms)
        .collect();
    assert_eq!(backoffs, vec![Some(1000), Some(2000), Some(4000), None]);
}

#[tokio::test(start_paused = true)]
async fn test_each_checkpoint_is_observable() {
    let h = TestHarness::new();
    let id = h.coordinator.start_saga(order_a1()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 25);

    // Charged, pausing before the shipments go out.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 50);
    assert_eq!(h.services.payment.charge_count(), 1);
    assert_eq!(h.services.shipping.shipment_count(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 75);

    h.coordinator.wait_for_result(id).await.unwrap();
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 100);
}

#[tokio::test(start_paused = true)]
async fn test_step_records_keep_first_attempt_time() {
    let h = TestHarness::new();
    h.services.inventory.set_plan(FailurePlan::fail_times(2));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    h.coordinator.wait_for_result(id).await.unwrap();

    let saga = h.coordinator.get_saga(id).await.unwrap();
    let attempts: Vec<_> = saga.attempts_of(STEP_GET_ITEMS).collect();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.first_attempt_at == attempts[0].first_attempt_at));
    assert_eq!(
        attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test(start_paused = true)]
async fn test_replay_yields_identical_output() {
    let h = TestHarness::new();
    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    let output = h.coordinator.wait_for_result(id).await.unwrap();
    let recorded = h.store.event_count().await;

    let (restarted, services) = h.restart();
    restarted.resume(id).await.unwrap();
    let replayed = restarted.wait_for_result(id).await.unwrap();

    assert_eq!(replayed, output);
    assert!(services.journal.calls().is_empty());
    assert_eq!(h.store.event_count().await, recorded);
}

#[tokio::test(start_paused = true)]
async fn test_crash_and_resume_does_not_reinvoke_recorded_steps() {
    let inner = InMemoryHistoryStore::new();
    let status = InMemoryStatusPublisher::new();
    let crashing = CrashingHistoryStore::new(inner.clone(), STEP_CHARGE_CUSTOMER);
    let first_life = InMemoryActivities::new();
    let coordinator = SagaCoordinator::new(crashing, first_life.activities())
        .with_status_publisher(Arc::new(status.clone()));

    let id = coordinator.start_saga(order_a1()).await.unwrap();
    assert!(matches!(
        coordinator.wait_for_result(id).await,
        Err(SagaError::Crashed(_))
    ));
    assert!(matches!(
        coordinator.outcome(id).await.unwrap(),
        Some(ExecutionOutcome::Crashed(_))
    ));
    assert_eq!(first_life.payment.charge_count(), 1);
    assert_eq!(first_life.shipping.shipment_count(), 0);

    let second_life = InMemoryActivities::new();
    let restarted = SagaCoordinator::new(inner.clone(), second_life.activities())
        .with_status_publisher(Arc::new(status.clone()));
    restarted.resume(id).await.unwrap();
    let output = restarted.wait_for_result(id).await.unwrap();

    assert_eq!(output.address, "1 Main St");
    assert_eq!(second_life.inventory.call_count(), 0);
    assert_eq!(second_life.fraud.call_count(), 0);
    assert_eq!(second_life.journal.count("PrepareShipment"), 0);
    assert_eq!(second_life.payment.charge_count(), 0);
    assert_eq!(second_life.shipping.shipment_count(), 3);

    let saga = restarted.get_saga(id).await.unwrap();
    assert_eq!(saga.attempts_of(STEP_CHARGE_CUSTOMER).count(), 1);
    assert_eq!(saga.progress_history(), &[25, 50, 75, 100]);
}

#[tokio::test(start_paused = true)]
async fn test_resumed_execution_keeps_its_progress() {
    let h = TestHarness::new();
    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    h.coordinator.wait_for_result(id).await.unwrap();
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 100);

    let (restarted, services) = h.restart();
    restarted.resume(id).await.unwrap();

    assert_eq!(restarted.progress(id).await.unwrap(), 100);
    assert_eq!(restarted.query(id, QUERY_PROGRESS).await.unwrap(), 100);

    restarted.wait_for_result(id).await.unwrap();
    assert_eq!(restarted.progress(id).await.unwrap(), 100);
    assert_eq!(services.shipping.shipment_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recover_resumes_only_incomplete_executions() {
    let inner = InMemoryHistoryStore::new();
    let crashing = CrashingHistoryStore::new(inner.clone(), STEP_PREPARE_SHIPMENT);
    let coordinator = SagaCoordinator::new(crashing, InMemoryActivities::new().activities());
    let crashed = coordinator.start_saga(order_a1()).await.unwrap();
    assert!(coordinator.wait_for_result(crashed).await.is_err());

    let healthy = SagaCoordinator::new(inner.clone(), InMemoryActivities::new().activities());
    let finished = healthy.start_saga(OrderInput::new("A2", "2 Side St")).await.unwrap();
    healthy.wait_for_result(finished).await.unwrap();

    let services = InMemoryActivities::new();
    let restarted = SagaCoordinator::new(inner, services.activities());
    let recovered = restarted.recover().await.unwrap();

    assert_eq!(recovered, vec![crashed]);
    let output = restarted.wait_for_result(crashed).await.unwrap();
    assert_eq!(output.address, "1 Main St");
    assert_eq!(services.journal.count("PrepareShipment"), 0);
    assert_eq!(services.payment.charge_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_retry_compensates() {
    let h = TestHarness::new();
    h.services
        .payment
        .set_charge_plan(FailurePlan::fail_always());

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.coordinator
        .cancel(id, Some("customer request".to_string()))
        .await
        .unwrap();

    let failure = h.expect_failure(id).await;
    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.step, STEP_CHARGE_CUSTOMER);
    assert_eq!(failure.phase, SagaPhase::CustomerCharged);
    assert_eq!(
        failure.compensations,
        vec![CompensationOutcome::succeeded(
            STEP_PREPARE_SHIPMENT,
            STEP_UNDO_PREPARE_SHIPMENT
        )]
    );
    assert_eq!(h.services.journal.count(STEP_REFUND_CUSTOMER), 0);
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 25);
    assert!(h.coordinator.get_saga(id).await.unwrap().cancel_requested());
}

#[tokio::test(start_paused = true)]
async fn test_recover_skips_unreadable_history() {
    let inner = InMemoryHistoryStore::new();
    let unreadable = ExecutionId::new();
    inner
        .append(
            vec![
                HistoryEvent::builder()
                    .event_type("SagaStarted")
                    .execution_id(unreadable)
                    .workflow_type("OrderFulfillment")
                    .version(Version::first())
                    .payload_raw(serde_json::json!({ "type": "SagaStarted", "data": {} }))
                    .build(),
            ],
            AppendOptions::expect_new(),
        )
        .await
        .unwrap();

    let crashing = CrashingHistoryStore::new(inner.clone(), STEP_PREPARE_SHIPMENT);
    let coordinator = SagaCoordinator::new(crashing, InMemoryActivities::new().activities());
    let crashed = coordinator.start_saga(order_a1()).await.unwrap();
    assert!(coordinator.wait_for_result(crashed).await.is_err());

    let restarted = SagaCoordinator::new(inner, InMemoryActivities::new().activities());
    let recovered = restarted.recover().await.unwrap();

    assert_eq!(recovered, vec![crashed]);
    restarted.wait_for_result(crashed).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_shipping_waits_for_siblings() {
    let h = TestHarness::new();
    h.services
        .shipping
        .set_item_plan(654321, FailurePlan::fail_always());

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    // Past the 1 + 1 + 3 second checkpoint pauses, into the shipping retries.
    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert!(h.services.shipping.call_count(654321) >= 1);
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 75);

    h.coordinator
        .cancel(id, Some("customer request".to_string()))
        .await
        .unwrap();
    let failure = h.expect_failure(id).await;

    assert_eq!(failure.kind, FailureKind::Cancelled);
    assert_eq!(failure.phase, SagaPhase::ItemsShipped);
    assert_eq!(
        failure.compensations,
        vec![
            CompensationOutcome::succeeded(STEP_CHARGE_CUSTOMER, STEP_REFUND_CUSTOMER),
            CompensationOutcome::succeeded(STEP_PREPARE_SHIPMENT, STEP_UNDO_PREPARE_SHIPMENT),
        ]
    );

    let journal = &h.services.journal;
    let calls = journal.calls();
    let refund = journal.position(STEP_REFUND_CUSTOMER).unwrap();
    let ship_calls: Vec<_> = calls
        .iter()
        .enumerate()
        .filter(|(_, call)| call.starts_with(STEP_SHIP_ORDER))
        .map(|(i, _)| i)
        .collect();
    assert!(!ship_calls.is_empty());
    assert!(ship_calls.iter().all(|&i| i < refund));
    assert!(refund < journal.position(STEP_UNDO_PREPARE_SHIPMENT).unwrap());
    assert!(h.services.shipping.shipped_items().contains(&654300));
    assert!(h.services.shipping.shipped_items().contains(&654322));
    assert_eq!(h.coordinator.progress(id).await.unwrap(), 75);
}

#[tokio::test(start_paused = true)]
async fn test_address_update_before_shipping() {
    let h = TestHarness::new();

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    h.coordinator
        .update_address(id, "2 Side St".to_string())
        .await
        .unwrap();
    let output = h.coordinator.wait_for_result(id).await.unwrap();

    assert_eq!(output.address, "2 Side St");
    assert!(h
        .services
        .shipping
        .shipped_addresses()
        .iter()
        .all(|a| a == "2 Side St"));
    assert!(matches!(
        h.coordinator.update_address(id, "3 Late Ave".to_string()).await,
        Err(SagaError::ExecutionNotRunning(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_address_locked_once_shipping_began() {
    let h = TestHarness::new();
    h.services
        .shipping
        .set_item_plan(654300, FailurePlan::fail_times(3));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    // Checkpoint pauses put the start of shipping at 5s.
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(matches!(
        h.coordinator.update_address(id, "3 Late Ave".to_string()).await,
        Err(SagaError::AddressLocked(_))
    ));
    let output = h.coordinator.wait_for_result(id).await.unwrap();
    assert_eq!(output.address, "1 Main St");
    assert!(h.coordinator.get_saga(id).await.unwrap().address_locked());
}

#[tokio::test(start_paused = true)]
async fn test_queries_while_running() {
    let h = TestHarness::new();
    h.services
        .payment
        .set_charge_plan(FailurePlan::fail_times(1));

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let items = h.coordinator.query(id, QUERY_ITEMS).await.unwrap();
    let ids: Vec<u64> = items
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![654300, 654321, 654322]);
    assert!(matches!(
        h.coordinator.query(id, "getSecrets").await,
        Err(SagaError::UnknownQuery(_))
    ));

    h.coordinator.wait_for_result(id).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_status_publish_failure_does_not_fail_saga() {
    let h = TestHarness::new();
    h.status.set_fail(true);

    let id = h.coordinator.start_saga(order_a1()).await.unwrap();
    h.coordinator.wait_for_result(id).await.unwrap();

    let statuses = h
        .coordinator
        .history(id, HistoryQuery::new().event_type("StatusPublished"))
        .await
        .unwrap();
    assert_eq!(statuses.len(), 6);
    assert!(statuses.iter().all(|event| {
        matches!(
            SagaEvent::from_history(event),
            Ok(SagaEvent::StatusPublished(ref data)) if !data.delivered
        )
    }));
    assert!(h.status.tag(id, STATUS_KEY).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_limit_is_recorded_in_options() {
    let store = InMemoryHistoryStore::new();
    let services = InMemoryActivities::new();
    let options = SagaOptions {
        fan_out_limit: Some(1),
        ..SagaOptions::default()
    };
    let coordinator =
        SagaCoordinator::new(store.clone(), services.activities()).with_options(options.clone());

    let id = coordinator.start_saga(order_a1()).await.unwrap();
    coordinator.wait_for_result(id).await.unwrap();

    // A coordinator with different options replays with the recorded ones.
    let restarted = SagaCoordinator::new(store, InMemoryActivities::new().activities());
    restarted.resume(id).await.unwrap();
    restarted.wait_for_result(id).await.unwrap();

    let history = restarted
        .history(id, HistoryQuery::new().event_type("SagaStarted"))
        .await
        .unwrap();
    let Ok(SagaEvent::SagaStarted(started)) = SagaEvent::from_history(&history[0]) else {
        panic!("first event must be SagaStarted");
    };
    assert_eq!(started.options, options);
    assert_eq!(services.shipping.shipment_count(), 3);
}
