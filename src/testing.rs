//! In-process stand-ins for the marketplace and the token provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::marketplace::{
  AccessTokenSource, ApiOrder, Marketplace, MarketplaceError, MarketplaceResult, OrderSearch,
  SellerIdentity,
};

/// A raw upstream order with the fields the extractor reads.
pub fn raw_order(id: u64, sku: &str) -> Value {
  json!({
    "id": id,
    "status": "paid",
    "total_amount": 49.9,
    "date_created": "2025-05-30T14:22:01.000-03:00",
    "buyer": { "nickname": "COMPRADOR" },
    "shipping": { "status": "ready_to_ship" },
    "order_items": [{
      "quantity": 1,
      "item": { "id": "MLB1", "title": format!("Peça {id}"), "seller_sku": sku }
    }]
  })
}

/// One scripted reply to `get_order`.
#[derive(Debug, Clone)]
pub enum Reply {
  Order(Value),
  Status(u16),
}

fn answer(reply: &Reply, context: &str) -> MarketplaceResult<ApiOrder> {
  match reply {
    Reply::Order(value) => Ok(serde_json::from_value(value.clone())?),
    Reply::Status(status) => Err(MarketplaceError::Status {
      status: *status,
      context: context.to_string(),
      body: r#"{"message":"scripted failure"}"#.to_string(),
    }),
  }
}

/// Scripted marketplace. `get_order` replies are consumed in order, the last
/// one repeating; unknown ids answer 404.
#[derive(Default)]
pub struct FakeMarketplace {
  recent: Mutex<Vec<Value>>,
  replies: Mutex<HashMap<String, VecDeque<Reply>>>,
  searches: Mutex<Vec<OrderSearch>>,
  order_fetches: AtomicUsize,
  fail_user: Mutex<Option<u16>>,
}

impl FakeMarketplace {
  pub fn new() -> Self {
    Self::default()
  }

  /// Orders returned by the search endpoint, newest first.
  pub fn with_recent(self, orders: Vec<Value>) -> Self {
    if let Ok(mut recent) = self.recent.lock() {
      *recent = orders;
    }
    self
  }

  pub fn script(&self, order_id: &str, replies: Vec<Reply>) {
    if let Ok(mut scripted) = self.replies.lock() {
      scripted.insert(order_id.to_string(), replies.into());
    }
  }

  pub fn fail_current_user(&self, status: u16) {
    if let Ok(mut fail) = self.fail_user.lock() {
      *fail = Some(status);
    }
  }

  pub fn order_fetches(&self) -> usize {
    self.order_fetches.load(Ordering::SeqCst)
  }

  pub fn searches(&self) -> Vec<OrderSearch> {
    self.searches.lock().map(|s| s.clone()).unwrap_or_default()
  }
}

#[async_trait]
impl Marketplace for FakeMarketplace {
  async fn current_user(&self, _token: &str) -> MarketplaceResult<SellerIdentity> {
    if let Some(status) = self.fail_user.lock().ok().and_then(|f| *f) {
      return Err(MarketplaceError::Status {
        status,
        context: "users/me".to_string(),
        body: String::new(),
      });
    }
    Ok(SellerIdentity {
      id: "123456".to_string(),
      nickname: "LOJA3D".to_string(),
    })
  }

  async fn search_orders(
    &self,
    _token: &str,
    search: &OrderSearch,
  ) -> MarketplaceResult<Vec<ApiOrder>> {
    if let Ok(mut searches) = self.searches.lock() {
      searches.push(search.clone());
    }
    let recent = self.recent.lock().map(|r| r.clone()).unwrap_or_default();
    recent
      .into_iter()
      .skip(search.offset as usize)
      .take(search.limit as usize)
      .map(|value| serde_json::from_value(value).map_err(MarketplaceError::from))
      .collect()
  }

  async fn get_order(&self, _token: &str, order_id: &str) -> MarketplaceResult<ApiOrder> {
    self.order_fetches.fetch_add(1, Ordering::SeqCst);
    let context = format!("orders/{order_id}");

    let reply = {
      let mut scripted = self
        .replies
        .lock()
        .map_err(|_| MarketplaceError::Unauthenticated("poisoned".into()))?;
      match scripted.get_mut(order_id) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
      }
    };

    match reply {
      Some(reply) => answer(&reply, &context),
      None => answer(&Reply::Status(404), &context),
    }
  }
}

/// Token source that always hands out the same token, or always fails.
pub struct StaticTokens {
  token: Option<String>,
  issued: AtomicUsize,
  invalidated: AtomicUsize,
}

impl StaticTokens {
  pub fn valid() -> Self {
    Self {
      token: Some("test-token".to_string()),
      issued: AtomicUsize::new(0),
      invalidated: AtomicUsize::new(0),
    }
  }

  pub fn missing() -> Self {
    Self {
      token: None,
      issued: AtomicUsize::new(0),
      invalidated: AtomicUsize::new(0),
    }
  }

  pub fn issued(&self) -> usize {
    self.issued.load(Ordering::SeqCst)
  }

  pub fn invalidated(&self) -> usize {
    self.invalidated.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl AccessTokenSource for StaticTokens {
  async fn valid_token(&self) -> MarketplaceResult<String> {
    self.issued.fetch_add(1, Ordering::SeqCst);
    self.token.clone().ok_or_else(|| {
      MarketplaceError::Unauthenticated("set ML_ACCESS_TOKEN or ML_REFRESH_TOKEN".to_string())
    })
  }

  async fn invalidate(&self) {
    self.invalidated.fetch_add(1, Ordering::SeqCst);
  }
}
