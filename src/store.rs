//! Storage seam for users, connected accounts, daily time series and posts.
//!
//! Time-series writes are idempotent: one document per `(user, account, day)`,
//! merged field by field (fields present in the write replace stored values,
//! absent fields are left alone), and all days of one call commit together or
//! not at all.

use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{
  AnalyticsTimeSeries, ConnectionStatus, OAuthTokenMaterial, Post, ProfileSettings, SignInProfile,
  SocialAccount, SocialPlatform, User,
};
use crate::normalize::DailyMetrics;

/// Default number of day rows per INSERT statement inside one batch.
pub const DEFAULT_WRITE_CHUNK_ROWS: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("invalid stored {entity}: {reason}")]
  Corrupt { entity: &'static str, reason: String },

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("batch write rejected: {0}")]
  BatchRejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
  pub user_id: String,
  pub account_id: String,
}

impl AccountKey {
  pub fn new(user_id: impl Into<String>, account_id: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      account_id: account_id.into(),
    }
  }
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl DateRange {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
    (start <= end).then_some(Self { start, end })
  }

  /// The `days` days ending on `end`.
  pub fn ending_on(end: NaiveDate, days: i64) -> Self {
    let days = days.max(1);
    Self {
      start: end - Duration::days(days - 1),
      end,
    }
  }

  pub fn contains(&self, day: NaiveDate) -> bool {
    self.start <= day && day <= self.end
  }

  pub fn days(&self) -> i64 {
    (self.end - self.start).num_days() + 1
  }

  /// Half-open instant bounds `[start 00:00 UTC, end+1 00:00 UTC)`.
  pub fn instant_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
    (day_start_utc(self.start), day_start_utc(self.end + Duration::days(1)))
  }
}

pub fn day_start_utc(day: NaiveDate) -> DateTime<Utc> {
  Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
}

pub trait AnalyticsStore: Send + Sync {
  fn fetch_user(&self, uid: &str) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

  /// Creates the user with free-tier defaults on first sign-in; afterwards only
  /// refreshes identity fields and the last-login time.
  fn upsert_user_on_sign_in(
    &self,
    profile: &SignInProfile,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<User, StoreError>> + Send;

  fn save_profile_settings(
    &self,
    uid: &str,
    settings: &ProfileSettings,
  ) -> impl Future<Output = Result<User, StoreError>> + Send;

  fn list_social_accounts(&self, uid: &str) -> impl Future<Output = Result<Vec<SocialAccount>, StoreError>> + Send;

  fn fetch_social_account(
    &self,
    key: &AccountKey,
  ) -> impl Future<Output = Result<Option<SocialAccount>, StoreError>> + Send;

  /// Inserts or replaces the account with the same id.
  fn save_social_account(&self, account: &SocialAccount) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn update_account_tokens(
    &self,
    key: &AccountKey,
    tokens: &OAuthTokenMaterial,
    status: ConnectionStatus,
  ) -> impl Future<Output = Result<(), StoreError>> + Send;

  /// No-op when the account does not exist.
  fn touch_last_synced(&self, key: &AccountKey, at: DateTime<Utc>) -> impl Future<Output = Result<(), StoreError>> + Send;

  /// Deletes the account together with its time series and posts. Returns whether
  /// the account existed.
  fn delete_social_account(&self, key: &AccountKey) -> impl Future<Output = Result<bool, StoreError>> + Send;

  /// Merge-upserts one document per day as a single atomic batch and returns the
  /// number of days written.
  fn upsert_time_series(
    &self,
    key: &AccountKey,
    platform: SocialPlatform,
    days: &[DailyMetrics],
    chunk_rows: usize,
  ) -> impl Future<Output = Result<usize, StoreError>> + Send;

  /// Documents in range, ascending by day.
  fn fetch_time_series(
    &self,
    key: &AccountKey,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<AnalyticsTimeSeries>, StoreError>> + Send;

  /// Keyed by `(account, platform, platform_post_id)`.
  fn upsert_post(&self, post: &Post) -> impl Future<Output = Result<(), StoreError>> + Send;

  /// Posts published in range, newest first.
  fn fetch_posts(&self, key: &AccountKey, range: DateRange) -> impl Future<Output = Result<Vec<Post>, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn date_range_rejects_inverted_bounds() {
    assert!(DateRange::new(d(2024, 2, 1), d(2024, 1, 1)).is_none());
    assert!(DateRange::new(d(2024, 1, 1), d(2024, 1, 1)).is_some());
  }

  #[test]
  fn ending_on_counts_the_end_day() {
    let range = DateRange::ending_on(d(2024, 1, 28), 28);
    assert_eq!(range.start, d(2024, 1, 1));
    assert_eq!(range.days(), 28);
    assert!(range.contains(d(2024, 1, 1)));
    assert!(!range.contains(d(2024, 1, 29)));
  }

  #[test]
  fn instant_bounds_are_half_open_utc_days() {
    let range = DateRange::new(d(2024, 1, 1), d(2024, 1, 2)).unwrap();
    let (from, to) = range.instant_bounds();
    assert_eq!(from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(to, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
  }
}
