//! Marketplace upstream: REST client, raw payload types and credentials.

pub mod api_types;
pub mod client;
pub mod error;
pub mod token;
pub mod types;

use async_trait::async_trait;

pub use api_types::ApiOrder;
pub use client::MarketplaceClient;
pub use error::{MarketplaceError, MarketplaceResult};
pub use token::{AccessTokenSource, TokenManager};
pub use types::{OrderSearch, SellerIdentity};

/// The slice of the marketplace API the order cache depends on.
///
/// Every call takes an already-valid bearer token; callers obtain one per
/// batch from an [`AccessTokenSource`].
#[async_trait]
pub trait Marketplace: Send + Sync {
  /// `GET /users/me`
  async fn current_user(&self, token: &str) -> MarketplaceResult<SellerIdentity>;

  /// `GET /orders/search`, one page, newest first
  async fn search_orders(&self, token: &str, search: &OrderSearch)
    -> MarketplaceResult<Vec<ApiOrder>>;

  /// `GET /orders/{id}`
  async fn get_order(&self, token: &str, order_id: &str) -> MarketplaceResult<ApiOrder>;
}
