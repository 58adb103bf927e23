//! Serde-deserializable types matching marketplace API responses.
//!
//! Every field the cache does not strictly need is optional so that a partial
//! payload still deserializes; defaults are applied later by the extractor.

use serde::{Deserialize, Deserializer};

/// Order ids arrive as JSON numbers but are keyed as strings locally.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Number(u64),
    Text(String),
  }

  Ok(match RawId::deserialize(deserializer)? {
    RawId::Number(n) => n.to_string(),
    RawId::Text(s) => s,
  })
}

/// Collections may arrive as `null` as well as absent.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
  D: Deserializer<'de>,
  T: Deserialize<'de>,
{
  Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiVariationAttribute {
  pub name: Option<String>,
  pub value_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiItem {
  pub id: Option<String>,
  pub title: Option<String>,
  pub seller_sku: Option<String>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub variation_attributes: Vec<ApiVariationAttribute>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiOrderItem {
  pub item: Option<ApiItem>,
  pub quantity: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiShipping {
  pub status: Option<String>,
  pub date_first_printed: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiBuyer {
  pub nickname: Option<String>,
}

/// A raw order as returned by `/orders/{id}` and inside `/orders/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  pub status: Option<String>,
  pub shipping: Option<ApiShipping>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub order_items: Vec<ApiOrderItem>,
  pub total_amount: Option<f64>,
  pub date_created: Option<String>,
  pub buyer: Option<ApiBuyer>,
}

// ============================================================================
// Search endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiOrderSearchResponse {
  #[serde(default, deserialize_with = "null_as_empty")]
  pub results: Vec<ApiOrder>,
}

// ============================================================================
// Users and OAuth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub nickname: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiTokenResponse {
  pub access_token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
  pub expires_in: i64,
}
