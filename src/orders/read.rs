//! Paginated order listing served strictly from the local cache.
//!
//! Never calls the marketplace. Stale entries are returned as they are and
//! handed to the refresh worker without waiting for it.

use chrono::serde::ts_milliseconds_option;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::freshness::{self, CachePolicy};
use crate::db::{OrderQuery, OrderStore};
use crate::event::RefreshDispatcher;

use super::types::{CachedOrder, StoredOrder};

pub const DEFAULT_LIMIT: u64 = 50;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListRequest {
  #[serde(default)]
  pub offset: u64,
  #[serde(default = "default_limit")]
  pub limit: u64,
  #[serde(default)]
  pub sku: Option<String>,
}

fn default_limit() -> u64 {
  DEFAULT_LIMIT
}

impl Default for ListRequest {
  fn default() -> Self {
    Self {
      offset: 0,
      limit: DEFAULT_LIMIT,
      sku: None,
    }
  }
}

/// A stored order with its cached projection and freshness attached.
#[derive(Debug, Clone, Serialize)]
pub struct ListedOrder {
  #[serde(flatten)]
  pub order: StoredOrder,
  pub ml_data: CachedOrder,
  pub is_using_cache: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_age_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paging {
  pub total: u64,
  pub limit: u64,
  pub offset: u64,
  pub has_next: bool,
  pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
  pub orders: Vec<ListedOrder>,
  pub paging: Paging,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cache_warning: Option<String>,
  pub refreshing_count: usize,
  #[serde(skip_serializing_if = "Option::is_none", with = "ts_milliseconds_option")]
  pub synced_at: Option<DateTime<Utc>>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub last_updated: DateTime<Utc>,
}

pub struct OrderReader<S> {
  store: Arc<S>,
  policy: CachePolicy,
  dispatcher: RefreshDispatcher,
  max_dispatch: usize,
}

impl<S: OrderStore> OrderReader<S> {
  pub fn new(
    store: Arc<S>,
    policy: CachePolicy,
    dispatcher: RefreshDispatcher,
    max_dispatch: usize,
  ) -> Self {
    Self {
      store,
      policy,
      dispatcher,
      max_dispatch,
    }
  }

  pub fn list_orders(&self, request: &ListRequest) -> Result<OrderPage> {
    self.list_orders_at(request, Utc::now())
  }

  /// Store failures are returned to the caller; everything after the page
  /// is built is best-effort.
  pub fn list_orders_at(&self, request: &ListRequest, now: DateTime<Utc>) -> Result<OrderPage> {
    let sku = request.sku.as_deref().filter(|s| !s.is_empty());
    let stored = self.store.list_orders(&OrderQuery {
      sku: sku.map(str::to_string),
      offset: request.offset,
      limit: request.limit,
    })?;
    let total = self.store.count_orders(sku)?;

    let mut orders = Vec::with_capacity(stored.len());
    let mut stale_ids = Vec::new();
    let mut oldest_cache: Option<DateTime<Utc>> = None;

    for order in stored {
      let Some(ml_data) = order.ml_cached_data.clone() else {
        debug!(order_id = %order.id, "No cached projection yet, skipping");
        continue;
      };

      let cached_at = order.ml_cached_at;
      let valid = self.policy.is_valid(cached_at, now);
      if !valid {
        stale_ids.push(order.id.clone());
      }
      if let Some(at) = cached_at {
        oldest_cache = Some(oldest_cache.map_or(at, |o| o.min(at)));
      }

      orders.push(ListedOrder {
        ml_data,
        is_using_cache: !valid,
        cache_age_minutes: freshness::age_minutes(cached_at, now),
        order,
      });
    }

    let refreshing_count = stale_ids.len();
    let cache_warning = if refreshing_count > 0 {
      Some(format!(
        "{refreshing_count} orders refreshing in the background..."
      ))
    } else {
      oldest_cache.and_then(|at| self.policy.warning(Some(at), now))
    };

    if !stale_ids.is_empty() {
      if stale_ids.len() > self.max_dispatch {
        warn!(
          stale = stale_ids.len(),
          cap = self.max_dispatch,
          "More stale orders than one refresh request takes"
        );
        stale_ids.truncate(self.max_dispatch);
      }
      self.dispatcher.dispatch(stale_ids);
    }

    let synced_at = orders.first().map(|o| o.order.synced_at);

    Ok(OrderPage {
      orders,
      paging: Paging {
        total,
        limit: request.limit,
        offset: request.offset,
        has_next: request.offset.saturating_add(request.limit) < total,
        has_prev: request.offset > 0,
      },
      cache_warning,
      refreshing_count,
      synced_at,
      last_updated: now,
    })
  }
}
