//! Periodic bulk refresh of recent orders from the marketplace.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::WrapErr, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::extract;
use crate::config::SyncConfig;
use crate::db::{OrderStore, WriteOutcome};
use crate::marketplace::{
  AccessTokenSource, ApiOrder, Marketplace, MarketplaceResult, OrderSearch, SellerIdentity,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub success: bool,
  pub total_found: usize,
  /// Orders seen for the first time
  pub total_synced: usize,
  pub total_updated: usize,
  /// Left alone because of a recent manual edit
  pub total_skipped: usize,
  pub message: String,
}

enum Outcome {
  Written(WriteOutcome),
  Skipped,
}

pub struct BulkSync<S> {
  store: Arc<S>,
  marketplace: Arc<dyn Marketplace>,
  tokens: Arc<dyn AccessTokenSource>,
  config: SyncConfig,
}

impl<S: OrderStore> BulkSync<S> {
  pub fn new(
    store: Arc<S>,
    marketplace: Arc<dyn Marketplace>,
    tokens: Arc<dyn AccessTokenSource>,
    config: SyncConfig,
  ) -> Self {
    Self {
      store,
      marketplace,
      tokens,
      config,
    }
  }

  pub async fn run(&self) -> Result<SyncReport> {
    self.run_at(Utc::now()).await
  }

  /// Pull up to `max_pages` pages of recent orders and merge them into the
  /// store. Token, identity and search failures abort the run; per-order
  /// failures are logged and skipped.
  pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SyncReport> {
    info!("Starting marketplace sync");

    let token = self.tokens.valid_token().await?;
    let seller = self
      .upstream(self.marketplace.current_user(&token).await)
      .await
      .wrap_err("Failed to resolve seller identity")?;
    info!(seller_id = %seller.id, nickname = %seller.nickname, "Syncing orders for seller");

    let orders = self.fetch_recent(&token, &seller, now).await?;
    info!(count = orders.len(), "Fetched recent orders");

    if orders.is_empty() {
      return Ok(SyncReport {
        success: true,
        message: "No new orders found".to_string(),
        ..SyncReport::default()
      });
    }

    let mut report = SyncReport {
      success: true,
      total_found: orders.len(),
      ..SyncReport::default()
    };
    let cooldown_start = now - self.config.manual_edit_cooldown();

    for order in &orders {
      match self.sync_order(order, cooldown_start, now) {
        Ok(Outcome::Written(WriteOutcome::Created)) => report.total_synced += 1,
        Ok(Outcome::Written(WriteOutcome::Updated)) => report.total_updated += 1,
        Ok(Outcome::Skipped) => report.total_skipped += 1,
        Err(e) => error!(order_id = %order.id, "Failed to sync order: {}", e),
      }
    }

    report.message = format!(
      "{} orders synced ({} new, {} updated)",
      report.total_synced + report.total_updated,
      report.total_synced,
      report.total_updated
    );
    info!(
      new = report.total_synced,
      updated = report.total_updated,
      skipped = report.total_skipped,
      "Sync finished"
    );

    Ok(report)
  }

  async fn fetch_recent(
    &self,
    token: &str,
    seller: &SellerIdentity,
    now: DateTime<Utc>,
  ) -> Result<Vec<ApiOrder>> {
    let date_from = now - self.config.lookback();
    let mut orders = Vec::new();

    for page in 0..self.config.max_pages {
      let search = OrderSearch {
        seller_id: seller.id.clone(),
        date_from,
        offset: page * self.config.page_size,
        limit: self.config.page_size,
      };
      let results = self
        .upstream(self.marketplace.search_orders(token, &search).await)
        .await?;

      debug!(page, count = results.len(), "Fetched order page");
      let short_page = results.len() < self.config.page_size as usize;
      orders.extend(results);
      if short_page {
        break;
      }
    }

    Ok(orders)
  }

  /// Credential rejections drop the cached token before the error propagates.
  async fn upstream<T>(&self, result: MarketplaceResult<T>) -> Result<T> {
    match result {
      Ok(value) => Ok(value),
      Err(e) => {
        if e.is_credential_problem() {
          self.tokens.invalidate().await;
        }
        Err(e.into())
      }
    }
  }

  fn sync_order(
    &self,
    order: &ApiOrder,
    cooldown_start: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<Outcome> {
    // The cooldown check and the carried-forward fields see the document as
    // it is at write time, so a concurrent manual edit is never overwritten.
    let written = self.store.upsert_order_with(&order.id, &mut |existing| {
      if existing.is_some_and(|e| e.edited_by_hand_since(cooldown_start)) {
        return None;
      }
      Some(extract::merge(&order.id, order, existing, now))
    })?;

    match written {
      Some(outcome) => Ok(Outcome::Written(outcome)),
      None => {
        debug!(order_id = %order.id, "Recently edited by hand, skipping");
        Ok(Outcome::Skipped)
      }
    }
  }
}
