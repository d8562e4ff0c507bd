use hyper::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::normalize::NormalizeError;
use crate::providers::youtube_analytics::{AnalyticsErrorKind, ForbiddenReason, YoutubeAnalyticsError};
use crate::store::StoreError;

pub const ANALYTICS_SCOPE: &str = "https://www.googleapis.com/auth/yt-analytics.readonly";

#[derive(Debug, Error)]
pub enum IngestError {
  #[error("missing required parameters: {}", .0.join(", "))]
  MissingParameters(Vec<&'static str>),

  #[error("report is missing required column(s): {}", .0.join(", "))]
  MissingColumns(Vec<String>),

  #[error(transparent)]
  Upstream(#[from] YoutubeAnalyticsError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl From<NormalizeError> for IngestError {
  fn from(err: NormalizeError) -> Self {
    match err {
      NormalizeError::MissingColumns(cols) => IngestError::MissingColumns(cols),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
  InvalidArgument,
  Unauthenticated,
  PermissionDenied,
  NotFound,
  ResourceExhausted,
  FailedPrecondition,
  Unavailable,
  Internal,
}

impl ErrorCode {
  pub fn as_str(self) -> &'static str {
    match self {
      ErrorCode::InvalidArgument => "invalid-argument",
      ErrorCode::Unauthenticated => "unauthenticated",
      ErrorCode::PermissionDenied => "permission-denied",
      ErrorCode::NotFound => "not-found",
      ErrorCode::ResourceExhausted => "resource-exhausted",
      ErrorCode::FailedPrecondition => "failed-precondition",
      ErrorCode::Unavailable => "unavailable",
      ErrorCode::Internal => "internal",
    }
  }

  pub fn http_status(self) -> StatusCode {
    match self {
      ErrorCode::InvalidArgument | ErrorCode::FailedPrecondition => StatusCode::BAD_REQUEST,
      ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
      ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
      ErrorCode::NotFound => StatusCode::NOT_FOUND,
      ErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
      ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
      ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

/// What a caller sees when ingestion fails: a user-facing message plus the
/// underlying error text for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportableError {
  pub code: ErrorCode,
  pub message: String,
  pub details: String,
}

fn upstream_message(err: &YoutubeAnalyticsError) -> (ErrorCode, String) {
  match err.kind() {
    AnalyticsErrorKind::Forbidden(ForbiddenReason::QuotaExceeded) => (
      ErrorCode::ResourceExhausted,
      "YouTube Analytics quota exceeded. Try again later.".to_string(),
    ),
    AnalyticsErrorKind::Forbidden(ForbiddenReason::InsufficientPermissions) => (
      ErrorCode::PermissionDenied,
      format!(
        "The YouTube connection is missing the {ANALYTICS_SCOPE} (yt-analytics.readonly) OAuth scope. Reconnect the account and grant analytics access."
      ),
    ),
    AnalyticsErrorKind::Forbidden(ForbiddenReason::AccessNotConfigured) => (
      ErrorCode::FailedPrecondition,
      "The YouTube Analytics API is not enabled for this project.".to_string(),
    ),
    AnalyticsErrorKind::Forbidden(ForbiddenReason::Other(_)) if err.status == Some(401) => (
      ErrorCode::Unauthenticated,
      "YouTube rejected the access token; it may have expired. Reconnect the account.".to_string(),
    ),
    AnalyticsErrorKind::Forbidden(ForbiddenReason::Other(_)) => (
      ErrorCode::PermissionDenied,
      "YouTube denied access to this channel's analytics.".to_string(),
    ),
    AnalyticsErrorKind::BadRequest => (
      ErrorCode::InvalidArgument,
      "YouTube Analytics rejected the report query; the requested metrics and dimensions may be incompatible.".to_string(),
    ),
    AnalyticsErrorKind::Status(_) | AnalyticsErrorKind::Transport => (
      ErrorCode::Unavailable,
      "Could not fetch YouTube Analytics data. Try again later.".to_string(),
    ),
  }
}

impl IngestError {
  pub fn to_reportable(&self) -> ReportableError {
    let (code, message) = match self {
      IngestError::MissingParameters(names) => (
        ErrorCode::InvalidArgument,
        format!("Missing required parameters: {}.", names.join(", ")),
      ),
      IngestError::MissingColumns(cols) => (
        ErrorCode::Internal,
        format!("The YouTube Analytics report is missing required column(s): {}.", cols.join(", ")),
      ),
      IngestError::Upstream(err) => upstream_message(err),
      IngestError::Store(_) => (
        ErrorCode::Internal,
        "Failed to store YouTube analytics; no days were written.".to_string(),
      ),
    };

    ReportableError {
      code,
      message,
      details: self.to_string(),
    }
  }
}
