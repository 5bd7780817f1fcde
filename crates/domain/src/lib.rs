//! Domain layer for the order fulfillment saga.
//!
//! This crate provides:
//! - Aggregate trait for state folded from a history
//! - DomainEvent trait for recorded facts
//! - The order data model (`OrderInput`, `Item`, `Items`, `OrderOutput`)

pub mod aggregate;
pub mod error;
pub mod order;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use order::{Item, Items, OrderError, OrderInput, OrderOutput};
