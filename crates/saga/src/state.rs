//! Saga phase state machine.

use serde::{Deserialize, Serialize};

/// The phase of an order fulfillment saga.
///
/// State transitions:
/// ```text
/// Started ──► ItemsFetched ──► FraudChecked ──► ShipmentPrepared ──► CustomerCharged ──► ItemsShipped ──► Completed
///    │             │               │                 │                    │                  │
///    └─────────────┴───────────────┴──► Failed       └──► Aborting ◄──────┴──────────────────┘
///                                                            │
///                                                            ▼
///                                                       Compensated ──► Failed
/// ```
///
/// Every forward phase can also fail directly when no compensatable effect
/// has been committed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaPhase {
    /// Input recorded, nothing executed yet.
    #[default]
    Started,

    /// The item list has been fetched.
    ItemsFetched,

    /// The order passed the fraud check.
    FraudChecked,

    /// A shipment has been reserved (compensatable).
    ShipmentPrepared,

    /// The customer has been charged (compensatable).
    CustomerCharged,

    /// Every item has shipped.
    ItemsShipped,

    /// The saga finished successfully (terminal state).
    Completed,

    /// A step failed after a compensatable effect; undo operations are running.
    Aborting,

    /// All registered undo operations have been attempted.
    Compensated,

    /// The saga failed (terminal state).
    Failed,
}

impl SagaPhase {
    /// Returns true if the saga can move from this phase to `to`.
    pub fn can_transition_to(&self, to: SagaPhase) -> bool {
        use SagaPhase::*;
        matches!(
            (self, to),
            (Started, ItemsFetched)
                | (ItemsFetched, FraudChecked)
                | (FraudChecked, ShipmentPrepared)
                | (ShipmentPrepared, CustomerCharged)
                | (CustomerCharged, ItemsShipped)
                | (ItemsShipped, Completed)
                | (ShipmentPrepared | CustomerCharged | ItemsShipped, Aborting)
                | (Aborting, Compensated)
                | (
                    Started
                        | ItemsFetched
                        | FraudChecked
                        | ShipmentPrepared
                        | CustomerCharged
                        | ItemsShipped
                        | Compensated,
                    Failed
                )
        )
    }

    /// Returns the phase the saga is working towards from this one.
    ///
    /// Used to name the phase a failing step belongs to.
    pub fn forward_target(&self) -> SagaPhase {
        match self {
            SagaPhase::Started => SagaPhase::ItemsFetched,
            SagaPhase::ItemsFetched => SagaPhase::FraudChecked,
            SagaPhase::FraudChecked => SagaPhase::ShipmentPrepared,
            SagaPhase::ShipmentPrepared => SagaPhase::CustomerCharged,
            SagaPhase::CustomerCharged => SagaPhase::ItemsShipped,
            SagaPhase::ItemsShipped => SagaPhase::Completed,
            other => *other,
        }
    }

    /// Returns true if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaPhase::Completed | SagaPhase::Failed)
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaPhase::Started => "Started",
            SagaPhase::ItemsFetched => "ItemsFetched",
            SagaPhase::FraudChecked => "FraudChecked",
            SagaPhase::ShipmentPrepared => "ShipmentPrepared",
            SagaPhase::CustomerCharged => "CustomerCharged",
            SagaPhase::ItemsShipped => "ItemsShipped",
            SagaPhase::Completed => "Completed",
            SagaPhase::Aborting => "Aborting",
            SagaPhase::Compensated => "Compensated",
            SagaPhase::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
