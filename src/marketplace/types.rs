use chrono::{DateTime, Utc};
use serde::Serialize;

/// The seller account the access token belongs to
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SellerIdentity {
  pub id: String,
  pub nickname: String,
}

/// One page of the "recent orders" search
#[derive(Debug, Clone)]
pub struct OrderSearch {
  pub seller_id: String,
  pub date_from: DateTime<Utc>,
  pub offset: u32,
  pub limit: u32,
}
