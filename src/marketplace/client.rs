use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::MarketplaceConfig;

use super::api_types::{ApiOrder, ApiOrderSearchResponse, ApiUser};
use super::error::{MarketplaceError, MarketplaceResult};
use super::types::{OrderSearch, SellerIdentity};
use super::Marketplace;

/// Marketplace REST client
#[derive(Clone)]
pub struct MarketplaceClient {
  http: reqwest::Client,
  base_url: Url,
}

impl MarketplaceClient {
  pub fn new(config: &MarketplaceConfig) -> Result<Self> {
    let base_url = Url::parse(&config.api_url)
      .map_err(|e| eyre!("Invalid marketplace URL {}: {}", config.api_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Invalid marketplace URL {}", config.api_url));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  pub(crate) fn http(&self) -> &reqwest::Client {
    &self.http
  }

  /// Build `{base}/{segments...}` with each segment percent-encoded.
  pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    // cannot_be_a_base was rejected in new(), so this never fails
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn get_json<T: DeserializeOwned>(
    &self,
    token: &str,
    url: Url,
    context: &str,
  ) -> MarketplaceResult<T> {
    debug!(%url, "GET {}", context);

    let response = self
      .http
      .get(url)
      .bearer_auth(token)
      .header("x-format-new", "true")
      .send()
      .await?;

    decode(response, context).await
  }
}

/// Turn a non-2xx response into `MarketplaceError::Status`, otherwise decode the body.
pub(crate) async fn decode<T: DeserializeOwned>(
  response: Response,
  context: &str,
) -> MarketplaceResult<T> {
  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(MarketplaceError::Status {
      status: status.as_u16(),
      context: context.to_string(),
      body,
    });
  }

  let bytes = response.bytes().await?;
  Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl Marketplace for MarketplaceClient {
  async fn current_user(&self, token: &str) -> MarketplaceResult<SellerIdentity> {
    let user: ApiUser = self
      .get_json(token, self.endpoint(&["users", "me"]), "current user")
      .await?;

    Ok(SellerIdentity {
      id: user.id,
      nickname: user.nickname,
    })
  }

  async fn search_orders(
    &self,
    token: &str,
    search: &OrderSearch,
  ) -> MarketplaceResult<Vec<ApiOrder>> {
    let mut url = self.endpoint(&["orders", "search"]);
    url
      .query_pairs_mut()
      .append_pair("seller", &search.seller_id)
      .append_pair(
        "order.date_created.from",
        &search
          .date_from
          .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
      )
      .append_pair("sort", "date_desc")
      .append_pair("limit", &search.limit.to_string())
      .append_pair("offset", &search.offset.to_string());

    let response: ApiOrderSearchResponse = self.get_json(token, url, "order search").await?;
    Ok(response.results)
  }

  async fn get_order(&self, token: &str, order_id: &str) -> MarketplaceResult<ApiOrder> {
    let context = format!("order {}", order_id);
    self
      .get_json(token, self.endpoint(&["orders", order_id]), &context)
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::extract::{Path, Query};
  use axum::http::{HeaderMap, StatusCode};
  use axum::routing::get;
  use axum::{Json, Router};
  use chrono::{TimeZone, Utc};
  use serde_json::{json, Value};
  use std::collections::HashMap;
  use tokio::net::TcpListener;

  async fn serve(router: Router) -> MarketplaceClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, router).await.unwrap();
    });

    MarketplaceClient::new(&MarketplaceConfig {
      api_url: format!("http://{}", addr),
      timeout_secs: 5,
    })
    .unwrap()
  }

  fn bearer(headers: &HeaderMap) -> String {
    headers
      .get("authorization")
      .and_then(|v| v.to_str().ok())
      .unwrap_or_default()
      .to_string()
  }

  #[tokio::test]
  async fn get_order_sends_bearer_and_parses_payload() {
    let router = Router::new().route(
      "/orders/{id}",
      get(|Path(id): Path<String>, headers: HeaderMap| async move {
        assert_eq!(bearer(&headers), "Bearer tok-1");
        Json(json!({ "id": id.parse::<u64>().unwrap(), "status": "paid" }))
      }),
    );
    let client = serve(router).await;

    let order = client.get_order("tok-1", "2000123").await.unwrap();
    assert_eq!(order.id, "2000123");
    assert_eq!(order.status.as_deref(), Some("paid"));
  }

  #[tokio::test]
  async fn non_success_status_becomes_status_error() {
    let router = Router::new().route(
      "/orders/{id}",
      get(|| async {
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(json!({ "message": "boom" })),
        )
      }),
    );
    let client = serve(router).await;

    let err = client.get_order("tok", "1").await.unwrap_err();
    match err {
      MarketplaceError::Status { status, body, .. } => {
        assert_eq!(status, 500);
        assert!(body.contains("boom"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn search_passes_paging_and_window() {
    let router = Router::new().route(
      "/orders/search",
      get(|Query(params): Query<HashMap<String, String>>| async move {
        assert_eq!(params.get("seller").map(String::as_str), Some("77"));
        assert_eq!(params.get("sort").map(String::as_str), Some("date_desc"));
        assert_eq!(params.get("limit").map(String::as_str), Some("50"));
        assert_eq!(params.get("offset").map(String::as_str), Some("50"));
        assert!(params
          .get("order.date_created.from")
          .unwrap()
          .starts_with("2025-01-01T00:00:00"));
        Json(json!({ "results": [{ "id": 1 }, { "id": 2 }] }))
      }),
    );
    let client = serve(router).await;

    let search = OrderSearch {
      seller_id: "77".into(),
      date_from: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
      offset: 50,
      limit: 50,
    };
    let orders = client.search_orders("tok", &search).await.unwrap();
    assert_eq!(orders.len(), 2);
  }

  #[tokio::test]
  async fn current_user_maps_identity() {
    let router = Router::new().route(
      "/users/me",
      get(|| async { Json::<Value>(json!({ "id": 77, "nickname": "PRINTSHOP" })) }),
    );
    let client = serve(router).await;

    let me = client.current_user("tok").await.unwrap();
    assert_eq!(me.id, "77");
    assert_eq!(me.nickname, "PRINTSHOP");
  }

  #[test]
  fn endpoint_encodes_segments() {
    let client = MarketplaceClient::new(&MarketplaceConfig {
      api_url: "https://api.example.com/".into(),
      timeout_secs: 1,
    })
    .unwrap();
    assert_eq!(
      client.endpoint(&["orders", "a/b"]).as_str(),
      "https://api.example.com/orders/a%2Fb"
    );
  }
}
