//! Query side of the fulfillment saga.
//!
//! This crate provides:
//! - [`Projection`] trait for folding events into read models
//! - [`OrderView`], merged per field so it converges under any arrival order
//! - [`ProjectionProcessor`] to fan consumed events out and rebuild from the log

pub mod error;
pub mod order_view;
pub mod processor;
pub mod projection;

pub use error::{ProjectionError, Result};
pub use order_view::{
    EtaSource, InMemoryOrderViewStore, OrderView, OrderViewPatch, OrderViewProjection,
    OrderViewStore, ViewStatus,
};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
