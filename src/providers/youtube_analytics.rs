use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, AUTHORIZATION};
use hyper::{Method, Request, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://youtubeanalytics.googleapis.com/";

/// Metrics requested for the daily channel report. Column order in the response is
/// not guaranteed to follow this list.
pub const CHANNEL_DAILY_METRICS: &str =
  "views,estimatedMinutesWatched,averageViewDuration,likes,comments,shares,subscribersGained,subscribersLost";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnHeader {
  pub name: String,
  #[serde(rename = "columnType", default)]
  pub column_type: Option<String>,
  #[serde(rename = "dataType", default)]
  pub data_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnalyticsReport {
  #[serde(rename = "columnHeaders", default)]
  pub column_headers: Vec<ColumnHeader>,
  #[serde(default)]
  pub rows: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
  Rows(AnalyticsReport),
  /// The account has no history in the requested window.
  NoRows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
  QuotaExceeded,
  InsufficientPermissions,
  AccessNotConfigured,
  Other(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsErrorKind {
  Forbidden(ForbiddenReason),
  BadRequest,
  Status(u16),
  Transport,
}

#[derive(Debug, Error)]
#[error("YouTube Analytics error{}: {message}", status_context(.status, .reason))]
pub struct YoutubeAnalyticsError {
  pub status: Option<u16>,
  /// `error.errors[0].reason` from the Google error envelope, when present.
  pub reason: Option<String>,
  pub message: String,
}

impl YoutubeAnalyticsError {
  fn transport(message: impl Into<String>) -> Self {
    Self {
      status: None,
      reason: None,
      message: message.into(),
    }
  }

  pub fn kind(&self) -> AnalyticsErrorKind {
    match self.status {
      None => AnalyticsErrorKind::Transport,
      Some(401) | Some(403) => {
        let reason = match self.reason.as_deref() {
          Some("quotaExceeded") | Some("dailyLimitExceeded") | Some("rateLimitExceeded") => {
            ForbiddenReason::QuotaExceeded
          }
          Some("insufficientPermissions") | Some("ACCESS_TOKEN_SCOPE_INSUFFICIENT") => {
            ForbiddenReason::InsufficientPermissions
          }
          Some("accessNotConfigured") | Some("SERVICE_DISABLED") => ForbiddenReason::AccessNotConfigured,
          other => ForbiddenReason::Other(other.map(str::to_string)),
        };
        AnalyticsErrorKind::Forbidden(reason)
      }
      Some(400) => AnalyticsErrorKind::BadRequest,
      Some(other) => AnalyticsErrorKind::Status(other),
    }
  }
}

fn status_context(status: &Option<u16>, reason: &Option<String>) -> String {
  match (status, reason) {
    (Some(status), Some(reason)) => format!(" (status {status}, reason {reason})"),
    (Some(status), None) => format!(" (status {status})"),
    (None, _) => String::new(),
  }
}

fn parse_error_body(body: &[u8]) -> (Option<String>, Option<String>) {
  let Ok(json) = serde_json::from_slice::<Value>(body) else {
    return (None, None);
  };
  let error = json.get("error");
  let message = error
    .and_then(|e| e.get("message"))
    .and_then(|v| v.as_str())
    .map(str::to_string);
  let reason = error
    .and_then(|e| e.get("errors"))
    .and_then(|v| v.as_array())
    .and_then(|errs| errs.iter().find_map(|e| e.get("reason").and_then(|r| r.as_str())))
    .or_else(|| {
      // Newer envelopes carry the reason under error.details[].reason.
      error
        .and_then(|e| e.get("details"))
        .and_then(|v| v.as_array())
        .and_then(|d| d.iter().find_map(|e| e.get("reason").and_then(|r| r.as_str())))
    })
    .map(str::to_string);
  (message, reason)
}

pub fn build_channel_daily_report_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  let base = base_url.trim_end_matches('/');
  format!(
    "{base}/v2/reports?ids=channel=={}&startDate={}&endDate={}&metrics={CHANNEL_DAILY_METRICS}&dimensions=day&sort=day",
    channel_id.trim(),
    start_dt,
    end_dt
  )
}

async fn fetch_report_json_by_url(access_token: &str, url: &str) -> Result<Value, YoutubeAnalyticsError> {
  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| YoutubeAnalyticsError::transport(e.to_string()))?
    .https_or_http()
    .enable_http1()
    .build();

  let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let req = Request::builder()
    .method(Method::GET)
    .uri(url)
    .header(AUTHORIZATION, format!("Bearer {}", access_token))
    .header(ACCEPT, "application/json")
    .body(Empty::<Bytes>::new())
    .map_err(|e| YoutubeAnalyticsError::transport(e.to_string()))?;

  let resp = client
    .request(req)
    .await
    .map_err(|e| YoutubeAnalyticsError::transport(e.to_string()))?;

  let status = resp.status();
  let body_bytes = resp
    .into_body()
    .collect()
    .await
    .map_err(|e| YoutubeAnalyticsError {
      status: Some(status.as_u16()),
      reason: None,
      message: e.to_string(),
    })?
    .to_bytes();

  if status != StatusCode::OK {
    let (message, reason) = parse_error_body(&body_bytes);
    let message = message.unwrap_or_else(|| {
      String::from_utf8_lossy(&body_bytes).chars().take(800).collect::<String>()
    });
    return Err(YoutubeAnalyticsError {
      status: Some(status.as_u16()),
      reason,
      message,
    });
  }

  serde_json::from_slice::<Value>(&body_bytes).map_err(|e| YoutubeAnalyticsError {
    status: Some(status.as_u16()),
    reason: None,
    message: format!("invalid json response: {e}"),
  })
}

fn report_from_json(json: Value) -> Result<ReportOutcome, YoutubeAnalyticsError> {
  let report: AnalyticsReport = serde_json::from_value(json).map_err(|e| YoutubeAnalyticsError {
    status: Some(200),
    reason: None,
    message: format!("unexpected report shape: {e}"),
  })?;
  if report.rows.is_empty() {
    Ok(ReportOutcome::NoRows)
  } else {
    Ok(ReportOutcome::Rows(report))
  }
}

pub async fn fetch_channel_daily_report_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<ReportOutcome, YoutubeAnalyticsError> {
  let url = build_channel_daily_report_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  report_from_json(json)
}
