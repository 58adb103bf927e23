//! JSON endpoints under `/api`.
//!
//! - `GET /api/health`
//! - `GET /api/orders?offset&limit&sku` - cached listing
//! - `PATCH /api/orders/{id}` - manual fulfillment edit
//! - `GET|POST /api/sync` - bulk sync from the marketplace
//! - `POST /api/orders/process-queue` - one refresh queue batch
//! - `GET|POST /api/queue/cleanup` - purge old queue items
//! - `GET /api/auth/check` - seller behind the current credentials

use axum::{
  extract::{Path, Query, State},
  response::Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::{App, CleanupReport};
use crate::marketplace::SellerIdentity;
use crate::orders::edit::{self, EditOutcome};
use crate::orders::types::{Fulfillment, StoredOrder};
use crate::orders::{ListRequest, OrderPage, SyncReport};
use crate::queue::ProcessReport;

use super::error::{ApiError, ApiResult};

pub async fn health() -> Json<Value> {
  Json(json!({ "status": "ok" }))
}

pub async fn list_orders(
  State(app): State<Arc<App>>,
  Query(request): Query<ListRequest>,
) -> ApiResult<Json<OrderPage>> {
  info!(offset = request.offset, limit = request.limit, sku = ?request.sku, "Listing orders");
  app
    .list_orders(&request)
    .map(Json)
    .map_err(|e| ApiError::internal(e, "Failed to load orders. Check the server logs."))
}

pub async fn edit_order(
  State(app): State<Arc<App>>,
  Path(order_id): Path<String>,
  Json(edit): Json<Fulfillment>,
) -> ApiResult<Json<StoredOrder>> {
  edit::validate(&edit).map_err(ApiError::BadRequest)?;

  match app
    .edit_order(&order_id, &edit)
    .map_err(|e| ApiError::internal(e, "Failed to save the order. Check the server logs."))?
  {
    EditOutcome::Applied(order) => Ok(Json(order)),
    EditOutcome::NotFound => Err(ApiError::NotFound(format!("Order {order_id} not found"))),
  }
}

pub async fn sync(State(app): State<Arc<App>>) -> ApiResult<Json<SyncReport>> {
  app.sync_orders().await.map(Json).map_err(|e| {
    ApiError::internal(
      e,
      "Check the marketplace configuration and that the database is writable",
    )
  })
}

pub async fn process_queue(State(app): State<Arc<App>>) -> ApiResult<Json<ProcessReport>> {
  app
    .process_queue()
    .await
    .map(Json)
    .map_err(|e| ApiError::internal(e, "Refresh queue processing failed. Check the server logs."))
}

pub async fn cleanup_queue(State(app): State<Arc<App>>) -> ApiResult<Json<CleanupReport>> {
  app
    .cleanup_queue()
    .map(Json)
    .map_err(|e| ApiError::internal(e, "Queue cleanup failed. Check the server logs."))
}

pub async fn auth_check(State(app): State<Arc<App>>) -> ApiResult<Json<SellerIdentity>> {
  app
    .auth_check()
    .await
    .map(Json)
    .map_err(|e| ApiError::internal(e, "Marketplace authentication failed"))
}
