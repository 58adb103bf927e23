//! OAuth access-token management.
//!
//! `TokenManager` owns the process-wide token state and hands out a valid
//! bearer token on demand, refreshing it when it is close to expiry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Credentials;

use super::api_types::ApiTokenResponse;
use super::client::{decode, MarketplaceClient};
use super::error::{MarketplaceError, MarketplaceResult};

/// Tokens expiring sooner than this are refreshed before use.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Lifetime assumed for an access token taken straight from the environment.
const ENV_TOKEN_LIFETIME_HOURS: i64 = 6;

/// Source of bearer tokens for upstream calls.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
  /// Return a token that is valid right now, refreshing if needed.
  async fn valid_token(&self) -> MarketplaceResult<String>;

  /// Forget the cached token so the next call refreshes.
  async fn invalidate(&self);
}

#[derive(Debug, Clone)]
struct TokenState {
  access_token: String,
  refresh_token: Option<String>,
  expires_at: DateTime<Utc>,
}

pub struct TokenManager {
  client: MarketplaceClient,
  credentials: Credentials,
  state: Mutex<Option<TokenState>>,
}

impl TokenManager {
  pub fn new(client: MarketplaceClient, credentials: Credentials) -> Self {
    Self {
      client,
      credentials,
      state: Mutex::new(None),
    }
  }

  async fn refresh(&self, refresh_token: &str) -> MarketplaceResult<TokenState> {
    let (Some(client_id), Some(client_secret)) = (
      self.credentials.client_id.as_deref(),
      self.credentials.client_secret.as_deref(),
    ) else {
      return Err(MarketplaceError::TokenRefresh(
        "ML_CLIENT_ID and ML_CLIENT_SECRET must be set".to_string(),
      ));
    };

    let response = self
      .client
      .http()
      .post(self.client.endpoint(&["oauth", "token"]))
      .form(&[
        ("grant_type", "refresh_token"),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("refresh_token", refresh_token),
      ])
      .send()
      .await?;

    let token: ApiTokenResponse = decode(response, "token refresh")
      .await
      .map_err(|e| MarketplaceError::TokenRefresh(e.to_string()))?;

    Ok(TokenState {
      access_token: token.access_token,
      // The marketplace rotates refresh tokens; keep the old one if none came back
      refresh_token: token
        .refresh_token
        .or_else(|| Some(refresh_token.to_string())),
      expires_at: Utc::now() + Duration::seconds(token.expires_in),
    })
  }
}

#[async_trait]
impl AccessTokenSource for TokenManager {
  async fn valid_token(&self) -> MarketplaceResult<String> {
    let mut state = self.state.lock().await;
    let now = Utc::now();

    if let Some(current) = state.as_ref() {
      if current.expires_at > now + Duration::minutes(EXPIRY_MARGIN_MINUTES) {
        return Ok(current.access_token.clone());
      }
    }

    let cached_refresh = state.as_ref().and_then(|s| s.refresh_token.clone());
    if let Some(refresh_token) = cached_refresh {
      match self.refresh(&refresh_token).await {
        Ok(fresh) => {
          let token = fresh.access_token.clone();
          *state = Some(fresh);
          return Ok(token);
        }
        Err(e) => error!("Failed to refresh cached token: {}", e),
      }
    }

    if let Some(refresh_token) = self.credentials.refresh_token.as_deref() {
      info!("Refreshing access token with ML_REFRESH_TOKEN");
      match self.refresh(refresh_token).await {
        Ok(fresh) => {
          let token = fresh.access_token.clone();
          *state = Some(fresh);
          return Ok(token);
        }
        Err(e) => error!("Failed to refresh token from environment: {}", e),
      }
    }

    let Some(access_token) = self.credentials.access_token.clone() else {
      return Err(MarketplaceError::Unauthenticated(
        "set ML_ACCESS_TOKEN or ML_REFRESH_TOKEN (with ML_CLIENT_ID and ML_CLIENT_SECRET)"
          .to_string(),
      ));
    };

    warn!(
      "Using ML_ACCESS_TOKEN; it expires in {} hours and will not renew. Set ML_REFRESH_TOKEN for automatic renewal.",
      ENV_TOKEN_LIFETIME_HOURS
    );
    *state = Some(TokenState {
      access_token: access_token.clone(),
      refresh_token: None,
      expires_at: now + Duration::hours(ENV_TOKEN_LIFETIME_HOURS),
    });

    Ok(access_token)
  }

  async fn invalidate(&self) {
    let mut state = self.state.lock().await;
    // Keep the refresh token so the next call can renew instead of starting over
    if let Some(current) = state.as_mut() {
      current.expires_at = DateTime::<Utc>::MIN_UTC;
    }
  }
}
