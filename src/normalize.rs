//! Maps YouTube Analytics report columns onto [`MetricsBag`] fields.
//!
//! Header order is resolved once per report. Every required column is checked up
//! front so a malformed report fails with a single error naming all of them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::models::MetricsBag;
use crate::providers::youtube_analytics::{AnalyticsReport, ColumnHeader};

pub const DAY_COLUMN: &str = "day";

/// Columns a daily report must carry. The day column is always required.
pub const REQUIRED_COLUMNS: &[&str] = &[DAY_COLUMN];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
  #[error("report is missing required column(s): {}", .0.join(", "))]
  MissingColumns(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricField {
  Views,
  WatchTimeMinutes,
  AverageViewDuration,
  Likes,
  Comments,
  Shares,
  SubscribersGained,
  SubscribersLost,
  Subscribers,
  Followers,
  Impressions,
  Reach,
}

fn metric_for_column(name: &str) -> Option<MetricField> {
  match name {
    "views" => Some(MetricField::Views),
    "estimatedMinutesWatched" | "watchTimeMinutes" => Some(MetricField::WatchTimeMinutes),
    "averageViewDuration" => Some(MetricField::AverageViewDuration),
    "likes" => Some(MetricField::Likes),
    "comments" => Some(MetricField::Comments),
    "shares" => Some(MetricField::Shares),
    "subscribersGained" => Some(MetricField::SubscribersGained),
    "subscribersLost" => Some(MetricField::SubscribersLost),
    "subscribers" | "subscriberCount" => Some(MetricField::Subscribers),
    "followers" => Some(MetricField::Followers),
    "impressions" | "videoThumbnailImpressions" => Some(MetricField::Impressions),
    "reach" => Some(MetricField::Reach),
    _ => None,
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
  day: usize,
  metrics: Vec<(MetricField, usize)>,
}

impl ColumnMap {
  pub fn resolve(headers: &[ColumnHeader], required: &[&str]) -> Result<Self, NormalizeError> {
    let position = |name: &str| headers.iter().position(|h| h.name == name);

    let missing: Vec<String> = std::iter::once(DAY_COLUMN)
      .chain(required.iter().copied().filter(|c| *c != DAY_COLUMN))
      .filter(|c| position(*c).is_none())
      .map(str::to_string)
      .collect();
    if !missing.is_empty() {
      return Err(NormalizeError::MissingColumns(missing));
    }

    let day = position(DAY_COLUMN).unwrap_or_default();
    let metrics = headers
      .iter()
      .enumerate()
      .filter_map(|(i, h)| metric_for_column(&h.name).map(|field| (field, i)))
      .collect();

    Ok(Self { day, metrics })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyMetrics {
  pub day: NaiveDate,
  pub metrics: MetricsBag,
}

impl DailyMetrics {
  /// Identity key of the stored document for this day.
  pub fn date_key(&self) -> String {
    self.day.format("%Y-%m-%d").to_string()
  }
}

fn as_f64(v: &Value) -> Option<f64> {
  v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_i64(v: &Value) -> Option<i64> {
  v.as_i64()
    .or_else(|| v.as_f64().map(|n| n.round() as i64))
    .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()).map(|n| n.round() as i64))
}

fn apply(bag: &mut MetricsBag, field: MetricField, v: &Value) {
  match field {
    MetricField::Views => bag.views = as_i64(v),
    MetricField::WatchTimeMinutes => bag.watch_time_minutes = as_f64(v),
    MetricField::AverageViewDuration => bag.average_view_duration = as_f64(v),
    MetricField::Likes => bag.likes = as_i64(v),
    MetricField::Comments => bag.comments = as_i64(v),
    MetricField::Shares => bag.shares = as_i64(v),
    MetricField::SubscribersGained => bag.subscribers_gained = as_i64(v),
    MetricField::SubscribersLost => bag.subscribers_lost = as_i64(v),
    MetricField::Subscribers => bag.subscribers = as_i64(v),
    MetricField::Followers => bag.followers = as_i64(v),
    MetricField::Impressions => bag.impressions = as_i64(v),
    MetricField::Reach => bag.reach = as_i64(v),
  }
}

fn derive_fields(bag: &mut MetricsBag) {
  bag.net_subscribers = match (bag.subscribers_gained, bag.subscribers_lost) {
    (None, None) => None,
    (gained, lost) => Some(gained.unwrap_or(0) - lost.unwrap_or(0)),
  };
  bag.watch_time_hours = bag.watch_time_minutes.map(|m| m / 60.0);
}

pub fn normalize_row(map: &ColumnMap, row: &[Value]) -> Option<DailyMetrics> {
  let day_str = row.get(map.day).and_then(|v| v.as_str()).unwrap_or("");
  let day = NaiveDate::parse_from_str(day_str.trim(), "%Y-%m-%d").ok()?;

  let mut metrics = MetricsBag::default();
  for (field, idx) in map.metrics.iter() {
    if let Some(v) = row.get(*idx) {
      apply(&mut metrics, *field, v);
    }
  }
  derive_fields(&mut metrics);

  Some(DailyMetrics { day, metrics })
}

/// Returns one bag per day in ascending order. Rows with an unparseable day are
/// skipped; repeated days are merged, later rows winning.
pub fn normalize_report(report: &AnalyticsReport, required: &[&str]) -> Result<Vec<DailyMetrics>, NormalizeError> {
  let map = ColumnMap::resolve(&report.column_headers, required)?;

  let mut by_day: BTreeMap<NaiveDate, MetricsBag> = BTreeMap::new();
  for row in report.rows.iter() {
    let Some(arr) = row.as_array() else {
      tracing::warn!("skipping non-array report row");
      continue;
    };
    match normalize_row(&map, arr) {
      Some(daily) => by_day.entry(daily.day).or_default().merge_from(&daily.metrics),
      None => tracing::warn!(row = %row, "skipping report row without a valid day"),
    }
  }

  Ok(
    by_day
      .into_iter()
      .map(|(day, metrics)| DailyMetrics { day, metrics })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn header(name: &str) -> ColumnHeader {
    ColumnHeader {
      name: name.to_string(),
      column_type: None,
      data_type: None,
    }
  }

  fn report(headers: &[&str], rows: Value) -> AnalyticsReport {
    AnalyticsReport {
      column_headers: headers.iter().map(|h| header(h)).collect(),
      rows: rows.as_array().cloned().unwrap_or_default(),
    }
  }

  #[test]
  fn single_day_without_subscriber_columns_has_no_net_subscribers() {
    let r = report(
      &["day", "views", "estimatedMinutesWatched"],
      json!([["2024-01-10", 100, 30]]),
    );
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].date_key(), "2024-01-10");
    assert_eq!(
      serde_json::to_value(&out[0].metrics).unwrap(),
      json!({"views": 100, "watchTimeMinutes": 30.0, "watchTimeHours": 0.5})
    );
  }

  #[test]
  fn net_subscribers_treats_one_missing_side_as_zero() {
    let r = report(
      &["day", "subscribersGained", "subscribersLost"],
      json!([["2024-01-10", 12, null], ["2024-01-11", null, 4], ["2024-01-12", 9, 3], ["2024-01-13", null, null]]),
    );
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    let net: Vec<Option<i64>> = out.iter().map(|d| d.metrics.net_subscribers).collect();
    assert_eq!(net, vec![Some(12), Some(-4), Some(6), None]);
  }

  #[test]
  fn column_order_does_not_matter() {
    let r = report(
      &["views", "subscribersLost", "day", "subscribersGained"],
      json!([[250, 2, "2024-02-01", 5]]),
    );
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    assert_eq!(out[0].day, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
    assert_eq!(out[0].metrics.views, Some(250));
    assert_eq!(out[0].metrics.net_subscribers, Some(3));
  }

  #[test]
  fn watch_time_hours_is_minutes_over_sixty() {
    let r = report(
      &["day", "estimatedMinutesWatched"],
      json!([["2024-01-10", 125], ["2024-01-11", "7.5"]]),
    );
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    for d in out.iter() {
      let minutes = d.metrics.watch_time_minutes.unwrap();
      let hours = d.metrics.watch_time_hours.unwrap();
      assert!((hours - minutes / 60.0).abs() < 1e-12);
    }
  }

  #[test]
  fn missing_day_column_fails_fast() {
    let r = report(&["views"], json!([[100]]));
    let err = normalize_report(&r, REQUIRED_COLUMNS).unwrap_err();
    assert_eq!(err, NormalizeError::MissingColumns(vec!["day".to_string()]));
    assert!(err.to_string().contains("missing required column"));
  }

  #[test]
  fn all_missing_required_columns_are_reported_together() {
    let headers = vec![header("likes")];
    let err = ColumnMap::resolve(&headers, &["day", "views", "estimatedMinutesWatched"]).unwrap_err();
    assert_eq!(
      err,
      NormalizeError::MissingColumns(vec![
        "day".to_string(),
        "views".to_string(),
        "estimatedMinutesWatched".to_string()
      ])
    );
  }

  #[test]
  fn null_metric_is_absent_and_zero_is_kept() {
    let r = report(&["day", "likes", "shares"], json!([["2024-01-10", null, 0]]));
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    assert_eq!(out[0].metrics.likes, None);
    assert_eq!(out[0].metrics.shares, Some(0));
  }

  #[test]
  fn rows_with_bad_days_are_skipped_and_duplicates_merged() {
    let r = report(
      &["day", "views", "likes"],
      json!([["not-a-date", 1, 1], ["2024-01-10", 5, null], ["2024-01-10", null, 2], "garbage"]),
    );
    let out = normalize_report(&r, REQUIRED_COLUMNS).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].metrics.views, Some(5));
    assert_eq!(out[0].metrics.likes, Some(2));
  }
}
