//! Shared types used across the order saga workspace.

mod types;

pub use types::ExecutionId;
