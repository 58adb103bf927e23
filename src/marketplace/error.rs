use thiserror::Error;

/// Failures talking to the marketplace or obtaining credentials for it.
#[derive(Debug, Error)]
pub enum MarketplaceError {
  #[error("Not authenticated with the marketplace: {0}")]
  Unauthenticated(String),

  #[error("Failed to refresh access token: {0}")]
  TokenRefresh(String),

  #[error("Marketplace API returned status {status} for {context}: {body}")]
  Status {
    status: u16,
    context: String,
    body: String,
  },

  #[error("Marketplace request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Failed to decode marketplace response: {0}")]
  Decode(#[from] serde_json::Error),
}

impl MarketplaceError {
  /// True when the root cause is missing or rejected credentials.
  pub fn is_credential_problem(&self) -> bool {
    match self {
      Self::Unauthenticated(_) | Self::TokenRefresh(_) => true,
      Self::Status { status, .. } => *status == 401 || *status == 403,
      Self::Transport(_) | Self::Decode(_) => false,
    }
  }
}

pub type MarketplaceResult<T> = std::result::Result<T, MarketplaceError>;
