use std::env::VarError;

use thiserror::Error;

use crate::providers::youtube_analytics;
use crate::store::DEFAULT_WRITE_CHUNK_ROWS;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;
pub const DEFAULT_DATA_BASE_URL: &str = "https://youtube.googleapis.com/";

const MAX_LOOKBACK_DAYS: i64 = 365;
const MAX_WRITE_CHUNK_ROWS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("Missing {0}")]
  MissingEnvVar(String),

  #[error("invalid value for {var}: {reason}")]
  InvalidEnvVar { var: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
  /// `None` when neither `TIDB_DATABASE_URL` nor `DATABASE_URL` is set.
  pub database_url: Option<String>,
  pub lookback_days: i64,
  pub write_chunk_rows: usize,
  pub analytics_base_url: String,
  pub data_base_url: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      database_url: None,
      lookback_days: DEFAULT_LOOKBACK_DAYS,
      write_chunk_rows: DEFAULT_WRITE_CHUNK_ROWS,
      analytics_base_url: youtube_analytics::DEFAULT_BASE_URL.to_string(),
      data_base_url: DEFAULT_DATA_BASE_URL.to_string(),
    }
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key))
  }

  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Result<String, VarError>,
  {
    let non_empty = |var: &str| lookup(var).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let parse_i64 = |var: &str, default: i64| -> Result<i64, ConfigError> {
      match non_empty(var) {
        None => Ok(default),
        Some(raw) => raw.parse::<i64>().map_err(|e| ConfigError::InvalidEnvVar {
          var: var.to_string(),
          reason: e.to_string(),
        }),
      }
    };

    let database_url = non_empty("TIDB_DATABASE_URL").or_else(|| non_empty("DATABASE_URL"));
    let lookback_days = parse_i64("OMNILYTICS_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?.clamp(1, MAX_LOOKBACK_DAYS);
    let write_chunk_rows = parse_i64("OMNILYTICS_WRITE_CHUNK_ROWS", DEFAULT_WRITE_CHUNK_ROWS as i64)?
      .clamp(1, MAX_WRITE_CHUNK_ROWS as i64) as usize;

    Ok(Self {
      database_url,
      lookback_days,
      write_chunk_rows,
      analytics_base_url: non_empty("YOUTUBE_ANALYTICS_BASE_URL")
        .unwrap_or_else(|| youtube_analytics::DEFAULT_BASE_URL.to_string()),
      data_base_url: non_empty("YOUTUBE_DATA_BASE_URL").unwrap_or_else(|| DEFAULT_DATA_BASE_URL.to_string()),
    })
  }
}

pub fn database_url() -> Option<String> {
  std::env::var("TIDB_DATABASE_URL")
    .ok()
    .filter(|v| !v.is_empty())
    .or_else(|| std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()))
}

pub fn has_database_url() -> bool {
  database_url().is_some()
}

/// Empty when unset; an empty token never authorizes a caller.
pub fn internal_token() -> String {
  std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default()
}

pub fn require_env(var: &str) -> Result<String, ConfigError> {
  std::env::var(var)
    .ok()
    .filter(|v| !v.trim().is_empty())
    .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup_from_map<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| map.get(key).map(|v| (*v).to_string()).ok_or(VarError::NotPresent)
  }

  #[test]
  fn defaults_apply_when_nothing_is_set() {
    let map = HashMap::new();
    let config = AppConfig::from_lookup(lookup_from_map(&map)).unwrap();
    assert_eq!(config, AppConfig::default());
  }

  #[test]
  fn tidb_url_wins_over_database_url() {
    let map = HashMap::from([("TIDB_DATABASE_URL", "mysql://tidb"), ("DATABASE_URL", "mysql://other")]);
    let config = AppConfig::from_lookup(lookup_from_map(&map)).unwrap();
    assert_eq!(config.database_url.as_deref(), Some("mysql://tidb"));

    let map = HashMap::from([("TIDB_DATABASE_URL", ""), ("DATABASE_URL", "mysql://other")]);
    let config = AppConfig::from_lookup(lookup_from_map(&map)).unwrap();
    assert_eq!(config.database_url.as_deref(), Some("mysql://other"));
  }

  #[test]
  fn numeric_settings_are_clamped() {
    let map = HashMap::from([("OMNILYTICS_LOOKBACK_DAYS", "9000"), ("OMNILYTICS_WRITE_CHUNK_ROWS", "0")]);
    let config = AppConfig::from_lookup(lookup_from_map(&map)).unwrap();
    assert_eq!(config.lookback_days, 365);
    assert_eq!(config.write_chunk_rows, 1);
  }

  #[test]
  fn rejects_non_numeric_lookback() {
    let map = HashMap::from([("OMNILYTICS_LOOKBACK_DAYS", "ninety")]);
    let err = AppConfig::from_lookup(lookup_from_map(&map)).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEnvVar { ref var, .. } if var == "OMNILYTICS_LOOKBACK_DAYS"));
  }

  #[test]
  fn base_urls_can_be_redirected() {
    let map = HashMap::from([
      ("YOUTUBE_ANALYTICS_BASE_URL", "http://127.0.0.1:9000/"),
      ("YOUTUBE_DATA_BASE_URL", "http://127.0.0.1:9001/"),
    ]);
    let config = AppConfig::from_lookup(lookup_from_map(&map)).unwrap();
    assert_eq!(config.analytics_base_url, "http://127.0.0.1:9000/");
    assert_eq!(config.data_base_url, "http://127.0.0.1:9001/");
  }
}
