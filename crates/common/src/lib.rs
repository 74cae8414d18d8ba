//! Identifiers shared by every service in the order fulfillment saga.

mod types;

pub use types::OrderId;
