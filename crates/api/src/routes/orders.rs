//! Order intake and read-model queries.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{Money, Order, OrderItem, OrderId};
use projections::{OrderView, OrderViewStore};
use saga::NewOrder;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

/// Summary returned once an order is persisted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub customer_id: String,
    pub total_amount: Money,
    pub currency: String,
    pub status: &'static str,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderCreatedResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.order_id.to_string(),
            customer_id: order.customer_id.to_string(),
            total_amount: order.total_amount(),
            currency: order.currency.clone(),
            status: order.status.as_str(),
            items: order.items().to_vec(),
            created_at: order.created_at,
        }
    }
}

/// POST /orders
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<NewOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let Json(request) = body?;
    let order = state.orders.create_order(request).await?;
    tracing::info!(order_id = %order.order_id, "Order accepted");
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{orderId}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    state
        .views
        .find(&OrderId::from(order_id.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))
}

/// GET /orders
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<OrderView>>, ApiError> {
    Ok(Json(state.views.find_all().await?))
}
