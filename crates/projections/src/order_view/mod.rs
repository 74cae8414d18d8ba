//! The order view read model.

mod projection;
mod status;
mod store;
mod view;

pub use projection::OrderViewProjection;
pub use status::ViewStatus;
pub use store::{InMemoryOrderViewStore, OrderViewStore};
pub use view::{EtaSource, OrderView, OrderViewPatch};
