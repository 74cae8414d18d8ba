//! HTTP surface and service wiring for the order fulfillment saga.
//!
//! [`Pipeline`] assembles the event log, the four services and the order
//! view materializer; [`create_app`] exposes order intake and the read
//! model over axum, with Prometheus metrics and tracing layers.

pub mod config;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use domain::store::InMemoryOrderRepository;
use event_log::Topics;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::InMemoryOrderViewStore;
use saga::OrderOriginator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use pipeline::Pipeline;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderOriginator<InMemoryOrderRepository>>,
    pub views: InMemoryOrderViewStore,
    pub topics: Topics,
}

/// Creates the router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::scrape))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            get(routes::orders::list).post(routes::orders::create),
        )
        .route("/orders/{order_id}", get(routes::orders::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(axum::middleware::from_fn(middleware::track_http_metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
