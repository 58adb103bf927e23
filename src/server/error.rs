use axum::{
  http::StatusCode,
  response::{IntoResponse, Json, Response},
};
use color_eyre::Report;
use serde::Serialize;
use tracing::error;

use crate::marketplace::MarketplaceError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

const CREDENTIALS_HINT: &str =
  "Check that ML_CLIENT_ID, ML_CLIENT_SECRET and ML_REFRESH_TOKEN (or ML_ACCESS_TOKEN) are set and valid";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  NotFound(String),

  #[error("{message}")]
  Internal { message: String, hint: String },
}

#[derive(Serialize)]
struct ErrorBody {
  success: bool,
  error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  hint: Option<String>,
}

impl ApiError {
  /// Internal failure with `hint`, or the credentials hint when a
  /// marketplace credential problem is anywhere in the chain.
  pub fn internal(report: Report, hint: &str) -> Self {
    let credentials = report.chain().any(|cause| {
      cause
        .downcast_ref::<MarketplaceError>()
        .is_some_and(MarketplaceError::is_credential_problem)
    });
    error!("Request failed: {:#}", report);

    Self::Internal {
      message: report.to_string(),
      hint: if credentials { CREDENTIALS_HINT } else { hint }.to_string(),
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status_code();
    let hint = match &self {
      ApiError::Internal { hint, .. } => Some(hint.clone()),
      _ => None,
    };
    let body = ErrorBody {
      success: false,
      error: self.to_string(),
      hint,
    };
    (status, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;

  #[test]
  fn credential_failures_get_the_credentials_hint() {
    let report = Report::new(MarketplaceError::Unauthenticated("no token".into()))
      .wrap_err("Failed to obtain access token");

    match ApiError::internal(report, "generic") {
      ApiError::Internal { message, hint } => {
        assert_eq!(message, "Failed to obtain access token");
        assert_eq!(hint, CREDENTIALS_HINT);
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn other_failures_keep_the_given_hint() {
    match ApiError::internal(eyre!("disk full"), "Check the server logs") {
      ApiError::Internal { hint, .. } => assert_eq!(hint, "Check the server logs"),
      other => panic!("unexpected {other:?}"),
    }
  }
}
