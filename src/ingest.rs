//! Initial YouTube ingestion: fetch the daily channel report for the lookback
//! window, normalize it and merge-upsert one document per day.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::IngestError;
use crate::models::{MetricsBag, SocialPlatform};
use crate::normalize::{normalize_report, DailyMetrics, REQUIRED_COLUMNS};
use crate::providers::youtube_analytics::{fetch_channel_daily_report_with_base_url, ReportOutcome};
use crate::providers::youtube_api::fetch_channel_statistics_with_base_url;
use crate::store::{AccountKey, AnalyticsStore};

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestRequest {
  pub user_id: String,
  pub social_account_id: String,
  pub access_token: String,
  pub youtube_channel_id: String,
}

impl std::fmt::Debug for IngestRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IngestRequest")
      .field("user_id", &self.user_id)
      .field("social_account_id", &self.social_account_id)
      .field("access_token", &"<redacted>")
      .field("youtube_channel_id", &self.youtube_channel_id)
      .finish()
  }
}

impl IngestRequest {
  /// Rejects blank fields before any network call, naming every one that is missing.
  pub fn validate(&self) -> Result<(), IngestError> {
    let missing: Vec<&'static str> = [
      ("userId", &self.user_id),
      ("socialAccountId", &self.social_account_id),
      ("accessToken", &self.access_token),
      ("youtubeChannelId", &self.youtube_channel_id),
    ]
    .into_iter()
    .filter(|(_, v)| v.trim().is_empty())
    .map(|(name, _)| name)
    .collect();

    if missing.is_empty() {
      Ok(())
    } else {
      Err(IngestError::MissingParameters(missing))
    }
  }

  pub fn account_key(&self) -> AccountKey {
    AccountKey::new(self.user_id.trim(), self.social_account_id.trim())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
  pub success: bool,
  pub message: String,
  pub documents_written: usize,
}

/// Inclusive report window. Ends yesterday because same-day metrics are not final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestWindow {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl IngestWindow {
  pub fn rolling(today: NaiveDate, lookback_days: i64) -> Self {
    let lookback_days = lookback_days.max(1);
    Self {
      start: today - Duration::days(lookback_days),
      end: today - Duration::days(1),
    }
  }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
  pub analytics_base_url: String,
  /// When set, the channel's current subscriber total is recorded on the last day
  /// of the window.
  pub data_base_url: Option<String>,
  pub window: IngestWindow,
  pub write_chunk_rows: usize,
}

impl IngestOptions {
  pub fn from_config(config: &AppConfig, today: NaiveDate) -> Self {
    Self {
      analytics_base_url: config.analytics_base_url.clone(),
      data_base_url: Some(config.data_base_url.clone()),
      window: IngestWindow::rolling(today, config.lookback_days),
      write_chunk_rows: config.write_chunk_rows,
    }
  }
}

async fn attach_subscriber_snapshot(days: &mut Vec<DailyMetrics>, req: &IngestRequest, base_url: &str, on: NaiveDate) {
  let stats = match fetch_channel_statistics_with_base_url(&req.access_token, base_url, req.youtube_channel_id.trim()).await
  {
    Ok(stats) => stats,
    Err(e) => {
      tracing::warn!(channel_id = %req.youtube_channel_id, error = %e, "channel statistics lookup failed; skipping subscriber snapshot");
      return;
    }
  };
  let Some(subscribers) = stats.and_then(|s| s.subscriber_count) else {
    return;
  };
  let subscribers = i64::try_from(subscribers).unwrap_or(i64::MAX);

  match days.iter_mut().find(|d| d.day == on) {
    Some(day) => day.metrics.subscribers = Some(subscribers),
    None => days.push(DailyMetrics {
      day: on,
      metrics: MetricsBag {
        subscribers: Some(subscribers),
        ..MetricsBag::default()
      },
    }),
  }
}

pub async fn fetch_initial_youtube_stats<S: AnalyticsStore>(
  store: &S,
  req: &IngestRequest,
  opts: &IngestOptions,
  now: DateTime<Utc>,
) -> Result<IngestResponse, IngestError> {
  req.validate()?;
  let key = req.account_key();
  let channel_id = req.youtube_channel_id.trim();

  tracing::info!(
    user_id = %key.user_id,
    account_id = %key.account_id,
    channel_id = %channel_id,
    start = %opts.window.start,
    end = %opts.window.end,
    "fetching youtube analytics"
  );

  let outcome = fetch_channel_daily_report_with_base_url(
    &req.access_token,
    &opts.analytics_base_url,
    channel_id,
    opts.window.start,
    opts.window.end,
  )
  .await
  .inspect_err(|e| tracing::error!(account_id = %key.account_id, error = %e, "youtube analytics fetch failed"))?;

  let report = match outcome {
    ReportOutcome::Rows(report) => report,
    ReportOutcome::NoRows => {
      tracing::info!(account_id = %key.account_id, "no youtube analytics rows in window");
      return Ok(IngestResponse {
        success: true,
        message: "No YouTube Analytics data is available for this channel in the requested window.".to_string(),
        documents_written: 0,
      });
    }
  };

  let mut days = normalize_report(&report, REQUIRED_COLUMNS)
    .inspect_err(|e| tracing::error!(account_id = %key.account_id, error = %e, "youtube analytics report rejected"))?;

  if let Some(base_url) = opts.data_base_url.as_deref() {
    attach_subscriber_snapshot(&mut days, req, base_url, opts.window.end).await;
  }

  let written = store
    .upsert_time_series(&key, SocialPlatform::Youtube, &days, opts.write_chunk_rows)
    .await
    .inspect_err(|e| tracing::error!(account_id = %key.account_id, error = %e, "time series batch failed"))?;
  store.touch_last_synced(&key, now).await?;

  tracing::info!(user_id = %key.user_id, account_id = %key.account_id, rows = written, "youtube analytics stored");

  Ok(IngestResponse {
    success: true,
    message: format!("Successfully fetched and stored YouTube analytics for {written} day(s)."),
    documents_written: written,
  })
}
