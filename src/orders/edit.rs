//! Manual edits to the internally-owned fulfillment fields.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::info;

use crate::db::OrderStore;

use super::types::{Fulfillment, OrderPatch, StoredOrder};

/// Print priorities run from 1 (lowest) to 5 (highest).
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome {
  Applied(StoredOrder),
  NotFound,
}

/// Reasons an edit is refused before touching the store.
pub fn validate(edit: &Fulfillment) -> std::result::Result<(), String> {
  if edit.is_empty() {
    return Err("Edit contains no fields".to_string());
  }
  if let Some(priority) = edit.priority {
    if !PRIORITY_RANGE.contains(&priority) {
      return Err(format!("Priority must be between 1 and 5, got {priority}"));
    }
  }
  if edit.filament_used_grams.is_some_and(|g| g < 0.0) {
    return Err("Filament used cannot be negative".to_string());
  }
  if edit.print_cost.is_some_and(|c| c < 0.0) {
    return Err("Print cost cannot be negative".to_string());
  }
  Ok(())
}

/// Field-merge `edit` into the order and flag it as edited by hand, which
/// holds off the bulk sync for its cooldown window.
pub fn apply_manual_edit<S: OrderStore + ?Sized>(
  store: &S,
  order_id: &str,
  edit: &Fulfillment,
  now: DateTime<Utc>,
) -> Result<EditOutcome> {
  if store.get_order(order_id)?.is_none() {
    return Ok(EditOutcome::NotFound);
  }

  let patch = OrderPatch {
    fulfillment: edit.clone(),
    updated_at: Some(now),
    manually_updated: Some(true),
    ..OrderPatch::default()
  };
  store.update_order(order_id, &patch)?;
  info!(order_id, "Applied manual edit");

  Ok(match store.get_order(order_id)? {
    Some(order) => EditOutcome::Applied(order),
    None => EditOutcome::NotFound,
  })
}
