//! Projection of raw upstream orders into the cached shape.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::marketplace::api_types::ApiItem;
use crate::marketplace::ApiOrder;
use crate::orders::types::{CachedOrder, OrderPatch, StoredOrder};

pub const UNTITLED: &str = "Produto sem título";
pub const NO_SKU: &str = "SEM-SKU";
pub const UNKNOWN: &str = "unknown";
pub const UNKNOWN_BUYER: &str = "Desconhecido";

/// "cor: azul claro", "Color vermelho", ...
static TITLE_COLOR: LazyLock<Option<Regex>> = LazyLock::new(|| {
  Regex::new(r"(?i)\b(?:colou?r|cor)[:\s]+([a-záàâãéèêíïóôõöúçñ\s]+)").ok()
});

fn non_empty(value: Option<&str>) -> Option<&str> {
  value.filter(|v| !v.trim().is_empty())
}

/// Keep the calendar day of an ISO 8601 timestamp.
fn day_of(timestamp: &str) -> String {
  timestamp
    .split('T')
    .next()
    .unwrap_or_default()
    .to_string()
}

/// Best-effort color: a variation attribute named like "color"/"cor", then a
/// `color: <value>` pattern in the title, else empty.
fn extract_color(item: &ApiItem) -> String {
  let from_variation = item.variation_attributes.iter().find_map(|attr| {
    let name = attr.name.as_deref()?.to_lowercase();
    if name.contains("cor") || name.contains("color") {
      non_empty(attr.value_name.as_deref())
    } else {
      None
    }
  });
  if let Some(value) = from_variation {
    return value.to_string();
  }

  item
    .title
    .as_deref()
    .and_then(|title| TITLE_COLOR.as_ref()?.captures(title))
    .and_then(|caps| caps.get(1))
    .map(|m| m.as_str().trim().to_string())
    .unwrap_or_default()
}

/// Reduce a raw order to the fields the listing needs. Never fails; missing
/// upstream fields fall back to placeholders.
pub fn extract(order: &ApiOrder) -> CachedOrder {
  let first = order.order_items.first();
  let item = first.and_then(|line| line.item.clone()).unwrap_or_default();
  let quantity = first
    .and_then(|line| line.quantity)
    .filter(|q| *q > 0)
    .unwrap_or(1);

  let shipping = order.shipping.as_ref();

  CachedOrder {
    title: non_empty(item.title.as_deref())
      .unwrap_or(UNTITLED)
      .to_string(),
    seller_sku: non_empty(item.seller_sku.as_deref())
      .or_else(|| non_empty(item.id.as_deref()))
      .unwrap_or(NO_SKU)
      .to_string(),
    quantity,
    price: order.total_amount.unwrap_or(0.0),
    color: extract_color(&item),
    status: non_empty(order.status.as_deref())
      .unwrap_or(UNKNOWN)
      .to_string(),
    shipping_status: non_empty(shipping.and_then(|s| s.status.as_deref()))
      .unwrap_or(UNKNOWN)
      .to_string(),
    buyer_nickname: non_empty(order.buyer.as_ref().and_then(|b| b.nickname.as_deref()))
      .unwrap_or(UNKNOWN_BUYER)
      .to_string(),
    date_created: order.date_created.as_deref().map(day_of).unwrap_or_default(),
    date_shipped: non_empty(shipping.and_then(|s| s.date_first_printed.as_deref())).map(day_of),
  }
}

/// Full sync patch: fresh projection and sync timestamps, with every
/// internally-owned field of `existing` carried over unchanged.
pub fn merge(
  order_id: &str,
  order: &ApiOrder,
  existing: Option<&StoredOrder>,
  now: DateTime<Utc>,
) -> OrderPatch {
  let cached = extract(order);
  tracing::trace!(order_id, sku = %cached.seller_sku, "merging upstream order");

  OrderPatch {
    sku: Some(cached.seller_sku.clone()),
    ml_cached_data: Some(cached),
    ml_cached_at: Some(now),
    synced_at: Some(now),
    created_at: Some(existing.map_or(now, |e| e.created_at)),
    fulfillment: existing.map(|e| e.fulfillment.clone()).unwrap_or_default(),
    updated_at: existing.and_then(|e| e.updated_at),
    manually_updated: existing.and_then(|e| e.manually_updated),
  }
}

/// Cache-only patch used by the queue processor; touches nothing else.
pub fn refresh(order: &ApiOrder, now: DateTime<Utc>) -> OrderPatch {
  OrderPatch {
    ml_cached_data: Some(extract(order)),
    ml_cached_at: Some(now),
    synced_at: Some(now),
    ..OrderPatch::default()
  }
}
