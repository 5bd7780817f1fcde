//! Order data model for the fulfillment saga.

mod input;
mod item;

pub use input::{OrderInput, OrderOutput};
pub use item::{Item, Items};

use thiserror::Error;

/// Errors raised when an order request is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Order ID is required.
    #[error("Order ID is required")]
    OrderIdRequired,

    /// Destination address is required.
    #[error("Address is required")]
    AddressRequired,

    /// Invalid quantity.
    #[error("Invalid quantity for item {item_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { item_id: u64, quantity: u32 },

    /// The same item appears twice in the order.
    #[error("Duplicate item: {item_id}")]
    DuplicateItem { item_id: u64 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,
}
