//! Persisted order documents and the patches that update them.
//!
//! Timestamps are stored as epoch milliseconds. Optional attributes are
//! omitted from the document when absent, never written as `null`.

use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn unix_epoch() -> DateTime<Utc> {
  DateTime::<Utc>::default()
}

/// Minimal snapshot of an upstream order, enough to render a listing row.
///
/// Always written whole; never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOrder {
  pub title: String,
  pub seller_sku: String,
  pub quantity: u32,
  pub price: f64,
  /// Best-effort, may be empty or wrong
  pub color: String,
  pub status: String,
  pub shipping_status: String,
  pub buyer_nickname: String,
  /// `YYYY-MM-DD`, empty when upstream had no date
  pub date_created: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub date_shipped: Option<String>,
}

/// Our own fulfillment workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FulfillmentStatus {
  ToDo,
  Printing,
  Ready,
  Shipped,
  Cancelled,
  Returned,
}

/// Internally-owned fields. Syncs copy these forward, never invent them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub internal_status: Option<FulfillmentStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub internal_notes: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<u8>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assigned_printer: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "ts_milliseconds_option"
  )]
  pub print_started_at: Option<DateTime<Utc>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "ts_milliseconds_option"
  )]
  pub print_completed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filament_used_grams: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub print_cost: Option<f64>,
}

impl Fulfillment {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// One document in the orders collection, keyed by the upstream order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOrder {
  pub id: String,
  #[serde(default)]
  pub sku: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ml_cached_data: Option<CachedOrder>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "ts_milliseconds_option"
  )]
  pub ml_cached_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub fulfillment: Fulfillment,
  #[serde(default = "unix_epoch", with = "ts_milliseconds")]
  pub synced_at: DateTime<Utc>,
  #[serde(default = "unix_epoch", with = "ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  /// Last manual edit
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "ts_milliseconds_option"
  )]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manually_updated: Option<bool>,
}

impl StoredOrder {
  /// True if a person edited this order after `since`.
  pub fn edited_by_hand_since(&self, since: DateTime<Utc>) -> bool {
    self.manually_updated == Some(true) && self.updated_at.is_some_and(|at| at > since)
  }
}

/// A field-level update. Only the fields that are `Some` are written; every
/// other field of the stored document is left as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sku: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ml_cached_data: Option<CachedOrder>,
  #[serde(skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
  pub ml_cached_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub fulfillment: Fulfillment,
  #[serde(skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
  pub synced_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub manually_updated: Option<bool>,
}

impl OrderPatch {
  /// The top-level document fields this patch sets.
  pub fn to_fields(&self) -> Result<Map<String, Value>> {
    match serde_json::to_value(self).map_err(|e| eyre!("Failed to serialize patch: {}", e))? {
      Value::Object(fields) => Ok(fields),
      other => Err(eyre!("Order patch serialized to non-object: {}", other)),
    }
  }
}
