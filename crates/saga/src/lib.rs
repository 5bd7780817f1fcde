//! Durable order fulfillment saga.
//!
//! The saga runs a fixed sequence of external steps and records every
//! decision it makes in an append-only history. If the process dies, a new
//! [`SagaCoordinator`] replays that history and continues where the old one
//! stopped: recorded steps are not invoked again, recorded sleeps are not
//! slept again, and generated values come back unchanged.
//!
//! The order fulfillment saga follows these steps:
//! 1. Get items
//! 2. Check fraud
//! 3. Prepare shipment (undo: release the shipment)
//! 4. Charge customer (undo: refund)
//! 5. Ship every item in parallel
//! 6. Generate a tracking id and complete
//!
//! If a step fails after shipment preparation, completed steps are
//! compensated in reverse order.

pub mod aggregate;
pub mod compensation;
pub mod context;
pub mod coordinator;
pub mod decision_log;
pub mod error;
pub mod events;
pub mod executor;
pub mod fanout;
pub mod options;
pub mod order_fulfillment;
pub mod progress;
pub mod query;
pub mod retry;
pub mod services;
pub mod state;
pub mod status;

pub use aggregate::SagaInstance;
pub use compensation::{CompensationOutcome, CompensationRegistry};
pub use context::SagaContext;
pub use coordinator::{ExecutionOutcome, ExecutionSummary, SagaCoordinator};
pub use decision_log::{DecisionKind, DecisionLog};
pub use error::{FailureKind, Result, SagaError, SagaFailure, StepError, StepFailure};
pub use events::{SagaEvent, StepOutcome, StepRecord};
pub use options::{SagaOptions, StepOptions};
pub use progress::{
    PROGRESS_VALUES, ProgressReader, ProgressWriter, progress_channel, progress_channel_from,
};
pub use query::{QUERY_ITEMS, QUERY_PROGRESS, QueryRegistry};
pub use retry::RetryPolicy;
pub use services::{
    CallJournal, FailurePlan, FraudService, InMemoryActivities, InMemoryFraudService,
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShipmentService,
    InMemoryShippingService, InventoryService, OrderActivities, PaymentResult, PaymentService,
    ShipmentRequest, ShipmentResult, ShipmentService, ShippingService,
};
pub use state::SagaPhase;
pub use status::{InMemoryStatusPublisher, PublishError, STATUS_KEY, StatusPublisher};
