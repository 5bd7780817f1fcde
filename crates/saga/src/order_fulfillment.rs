//! The order fulfillment saga.
//!
//! ```text
//! Started -> ItemsFetched -> FraudChecked -> ShipmentPrepared -> CustomerCharged
//!         -> ItemsShipped -> Completed
//! ```
//!
//! A step failure after shipment preparation moves the saga through
//! `Aborting -> Compensated -> Failed`, undoing completed steps in reverse.
//! A failure before that goes straight to `Failed`.

use std::sync::Arc;
use std::time::Duration;

use domain::{OrderInput, OrderOutput};

use crate::compensation::CompensationRegistry;
use crate::context::SagaContext;
use crate::error::{Result, SagaError, SagaFailure, StepError, StepFailure};
use crate::executor;
use crate::fanout;
use crate::options::StepOptions;
use crate::services::{OrderActivities, ShipmentRequest, ShipmentResult};
use crate::state::SagaPhase;
use crate::status::STATUS_KEY;

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

pub const STEP_GET_ITEMS: &str = "GetItems";
pub const STEP_CHECK_FRAUD: &str = "CheckFraud";
pub const STEP_PREPARE_SHIPMENT: &str = "PrepareShipment";
pub const STEP_UNDO_PREPARE_SHIPMENT: &str = "UndoPrepareShipment";
pub const STEP_CHARGE_CUSTOMER: &str = "ChargeCustomer";
pub const STEP_REFUND_CUSTOMER: &str = "RefundCustomer";
pub const STEP_SHIP_ORDER: &str = "ShipOrder";

pub const STATUS_GET_ITEMS: &str = "Get Items";
pub const STATUS_CHECK_FRAUD: &str = "Check Fraud";
pub const STATUS_PREPARE_SHIPMENT: &str = "Prepare Shipment";
pub const STATUS_CHARGE_CUSTOMER: &str = "Charge Customer";
pub const STATUS_SHIP_ORDER: &str = "Ship Order";
pub const STATUS_ORDER_COMPLETED: &str = "Order Completed";
pub const STATUS_COMPENSATING: &str = "Compensating";
pub const STATUS_ORDER_FAILED: &str = "Order Failed";

/// Pause after each progress checkpoint, in seconds.
const CHECKPOINT_PAUSES: [(u8, u64); 4] = [(25, 1), (50, 1), (75, 3), (100, 1)];

/// Runs the saga to its recorded end: an output, or [`SagaError::Failed`].
///
/// Any other error means the history could not be read or written; the
/// execution stopped and may be resumed later.
///
/// Progress is committed at the phase boundaries: 25 once the shipment is
/// prepared, 50 once the customer is charged, 75 just before the shipments
/// go out and 100 when every item has shipped. 50 and 75 have no step
/// between them, so 50 is only visible during the pause that follows it.
/// A retrying charge reads 25 and a retrying shipment reads 75.
#[tracing::instrument(skip(ctx, activities), fields(execution_id = %ctx.execution_id(), order_id = %ctx.input().order_id))]
pub async fn run(ctx: Arc<SagaContext>, activities: OrderActivities) -> Result<OrderOutput> {
    let mut compensations = CompensationRegistry::new();

    match forward(&ctx, &activities, &mut compensations).await {
        Ok(output) => Ok(output),
        Err(SagaError::Step(failure)) => {
            let failure = abort(&ctx, compensations, failure).await?;
            Err(SagaError::Failed(failure))
        }
        Err(other) => Err(other),
    }
}

async fn forward(
    ctx: &Arc<SagaContext>,
    activities: &OrderActivities,
    compensations: &mut CompensationRegistry,
) -> Result<OrderOutput> {
    let input = ctx.input();
    let step_options = StepOptions::forward(ctx.options());

    // 1. Fetch items
    ctx.publish_status(STATUS_KEY, STATUS_GET_ITEMS).await?;
    let inventory = &activities.inventory;
    let items = executor::execute(ctx, ctx.next_seq(), STEP_GET_ITEMS, input, &step_options, move || {
        inventory.get_items(input)
    })
    .await?;
    if items.is_empty() {
        return Err(StepFailure::Terminal {
            step: STEP_GET_ITEMS.to_string(),
            error: "order has no items to fulfil".to_string(),
            attempts: 1,
        }
        .into());
    }
    ctx.set_items(items.clone());
    ctx.enter_phase(SagaPhase::ItemsFetched).await?;

    // 2. Fraud check
    ctx.publish_status(STATUS_KEY, STATUS_CHECK_FRAUD).await?;
    let fraud = &activities.fraud;
    executor::execute(ctx, ctx.next_seq(), STEP_CHECK_FRAUD, input, &step_options, move || {
        fraud.check_fraud(input)
    })
    .await?;
    ctx.enter_phase(SagaPhase::FraudChecked).await?;

    // 3. Prepare shipment
    ctx.publish_status(STATUS_KEY, STATUS_PREPARE_SHIPMENT).await?;
    let shipment = &activities.shipment;
    executor::execute(ctx, ctx.next_seq(), STEP_PREPARE_SHIPMENT, input, &step_options, move || {
        shipment.prepare_shipment(input)
    })
    .await?;
    let undo = activities.shipment.clone();
    compensations
        .register(ctx, STEP_PREPARE_SHIPMENT, STEP_UNDO_PREPARE_SHIPMENT, input, move |value| {
            let undo = undo.clone();
            async move { undo.undo_prepare_shipment(&decode_input(value)?).await }
        })
        .await?;
    ctx.enter_phase(SagaPhase::ShipmentPrepared).await?;
    checkpoint(ctx, 25).await?;

    // 4. Charge customer
    ctx.publish_status(STATUS_KEY, STATUS_CHARGE_CUSTOMER).await?;
    let payment = &activities.payment;
    let charge_input = serde_json::json!({ "order": input, "workflowType": SAGA_TYPE });
    let receipt = executor::execute(ctx, ctx.next_seq(), STEP_CHARGE_CUSTOMER, &charge_input, &step_options, move || {
        payment.charge(input, SAGA_TYPE)
    })
    .await?;
    tracing::info!(payment_id = %receipt.payment_id, "customer charged");
    let refund = activities.payment.clone();
    compensations
        .register(ctx, STEP_CHARGE_CUSTOMER, STEP_REFUND_CUSTOMER, input, move |value| {
            let refund = refund.clone();
            async move { refund.refund(&decode_input(value)?).await }
        })
        .await?;
    ctx.enter_phase(SagaPhase::CustomerCharged).await?;
    checkpoint(ctx, 50).await?;

    // 5. Ship every item
    checkpoint(ctx, 75).await?;
    let address = ctx.resolve_address().await?;
    ctx.publish_status(STATUS_KEY, STATUS_SHIP_ORDER).await?;
    let requests: Vec<ShipmentRequest> = items
        .iter()
        .map(|item| ShipmentRequest {
            order_id: input.order_id.clone(),
            address: address.clone(),
            item: item.clone(),
        })
        .collect();
    let shipping = activities.shipping.clone();
    let shipments: Vec<ShipmentResult> = fanout::run_all(
        ctx,
        STEP_SHIP_ORDER,
        requests,
        step_options.clone(),
        ctx.options().fan_out_limit,
        move |request: ShipmentRequest| {
            let shipping = shipping.clone();
            async move { shipping.ship_item(&request).await }
        },
    )
    .await?;
    tracing::info!(shipments = shipments.len(), "all items shipped");
    ctx.enter_phase(SagaPhase::ItemsShipped).await?;
    checkpoint(ctx, 100).await?;

    // 6. Complete
    let tracking_id = ctx.generate_unique_id().await?;
    ctx.publish_status(STATUS_KEY, STATUS_ORDER_COMPLETED).await?;
    ctx.enter_phase(SagaPhase::Completed).await?;
    let output = ctx.complete(OrderOutput::new(tracking_id, address)).await?;

    tracing::info!(tracking_id = %output.tracking_id, "order fulfilled");
    Ok(output)
}

async fn abort(
    ctx: &SagaContext,
    mut compensations: CompensationRegistry,
    failure: StepFailure,
) -> Result<SagaFailure> {
    let mut saga_failure = SagaFailure::new(ctx.phase().forward_target(), &failure);
    tracing::warn!(
        phase = %saga_failure.phase,
        step = %saga_failure.step,
        reason = %saga_failure.reason,
        pending = compensations.len(),
        "saga aborting"
    );

    if !compensations.is_empty() {
        ctx.enter_phase(SagaPhase::Aborting).await?;
        ctx.publish_status(STATUS_KEY, STATUS_COMPENSATING).await?;
        saga_failure.compensations = compensations.compensate_all(ctx).await?;
        ctx.enter_phase(SagaPhase::Compensated).await?;
    }

    ctx.enter_phase(SagaPhase::Failed).await?;
    ctx.publish_status(STATUS_KEY, STATUS_ORDER_FAILED).await?;
    ctx.fail(saga_failure).await
}

/// Commits a progress value, then pauses so readers can observe it.
async fn checkpoint(ctx: &SagaContext, progress: u8) -> Result<()> {
    ctx.set_progress(progress).await?;
    if ctx.options().checkpoint_pauses
        && let Some((_, secs)) = CHECKPOINT_PAUSES.iter().find(|(p, _)| *p == progress)
    {
        ctx.sleep(Duration::from_secs(*secs)).await?;
    }
    Ok(())
}

fn decode_input(value: serde_json::Value) -> std::result::Result<OrderInput, StepError> {
    serde_json::from_value(value).map_err(|e| StepError::terminal(format!("invalid undo input: {e}")))
}
