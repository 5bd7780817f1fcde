//! Saga input and output values.

use serde::{Deserialize, Serialize};

use super::{Items, OrderError};

/// The immutable request that starts one fulfillment saga.
///
/// `order_id` is the correlation key passed to every step. Only `address`
/// may change after start, and only through the address update protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderInput {
    pub order_id: String,
    pub address: String,
    #[serde(default, alias = "items")]
    pub line_items: Items,
}

impl OrderInput {
    /// Creates an input with no line items.
    pub fn new(order_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            address: address.into(),
            line_items: Items::default(),
        }
    }

    /// Sets the line items.
    pub fn with_items(mut self, items: impl Into<Items>) -> Self {
        self.line_items = items.into();
        self
    }

    /// Returns a copy with the destination address replaced.
    pub fn with_address(&self, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..self.clone()
        }
    }

    /// Validates the request.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.order_id.trim().is_empty() {
            return Err(OrderError::OrderIdRequired);
        }
        if self.address.trim().is_empty() {
            return Err(OrderError::AddressRequired);
        }
        self.line_items.validate()
    }
}

/// The result of a completed saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOutput {
    pub tracking_id: String,
    pub address: String,
}

impl OrderOutput {
    pub fn new(tracking_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            address: address.into(),
        }
    }
}
