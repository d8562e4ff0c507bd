use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
  Instagram,
  Youtube,
  Linkedin,
  Twitter,
}

impl SocialPlatform {
  pub const ALL: [SocialPlatform; 4] = [
    SocialPlatform::Instagram,
    SocialPlatform::Youtube,
    SocialPlatform::Linkedin,
    SocialPlatform::Twitter,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      SocialPlatform::Instagram => "instagram",
      SocialPlatform::Youtube => "youtube",
      SocialPlatform::Linkedin => "linkedin",
      SocialPlatform::Twitter => "twitter",
    }
  }

  pub fn parse(input: &str) -> Option<Self> {
    match input.trim().to_ascii_lowercase().as_str() {
      "instagram" => Some(SocialPlatform::Instagram),
      "youtube" => Some(SocialPlatform::Youtube),
      "linkedin" => Some(SocialPlatform::Linkedin),
      "twitter" | "x" => Some(SocialPlatform::Twitter),
      _ => None,
    }
  }

  /// Platforms only available on the premium tier.
  pub fn is_premium_only(self) -> bool {
    matches!(self, SocialPlatform::Linkedin | SocialPlatform::Twitter)
  }
}

impl std::fmt::Display for SocialPlatform {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
  Connected,
  Disconnected,
  NeedsReauth,
  Error,
}

impl ConnectionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      ConnectionStatus::Connected => "connected",
      ConnectionStatus::Disconnected => "disconnected",
      ConnectionStatus::NeedsReauth => "needs_reauth",
      ConnectionStatus::Error => "error",
    }
  }

  pub fn parse(input: &str) -> Option<Self> {
    match input {
      "connected" => Some(ConnectionStatus::Connected),
      "disconnected" => Some(ConnectionStatus::Disconnected),
      "needs_reauth" => Some(ConnectionStatus::NeedsReauth),
      "error" => Some(ConnectionStatus::Error),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
  #[default]
  Free,
  Premium,
}

impl SubscriptionTier {
  pub fn as_str(self) -> &'static str {
    match self {
      SubscriptionTier::Free => "free",
      SubscriptionTier::Premium => "premium",
    }
  }

  pub fn parse(input: &str) -> Option<Self> {
    match input {
      "free" => Some(SubscriptionTier::Free),
      "premium" => Some(SubscriptionTier::Premium),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLimits {
  pub max_instagram: u32,
  pub max_youtube: u32,
  pub max_linkedin: u32,
  pub max_x: u32,
  pub max_total: u32,
}

impl AccountLimits {
  pub const fn free() -> Self {
    Self {
      max_instagram: 1,
      max_youtube: 1,
      max_linkedin: 0,
      max_x: 0,
      max_total: 2,
    }
  }

  pub const fn premium() -> Self {
    Self {
      max_instagram: 5,
      max_youtube: 5,
      max_linkedin: 5,
      max_x: 5,
      max_total: 20,
    }
  }

  pub fn for_tier(tier: SubscriptionTier) -> Self {
    match tier {
      SubscriptionTier::Free => Self::free(),
      SubscriptionTier::Premium => Self::premium(),
    }
  }

  pub fn max_for(&self, platform: SocialPlatform) -> u32 {
    match platform {
      SocialPlatform::Instagram => self.max_instagram,
      SocialPlatform::Youtube => self.max_youtube,
      SocialPlatform::Linkedin => self.max_linkedin,
      SocialPlatform::Twitter => self.max_x,
    }
  }
}

impl Default for AccountLimits {
  fn default() -> Self {
    Self::free()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub uid: String,
  pub email: Option<String>,
  pub display_name: Option<String>,
  pub photo_url: Option<String>,
  pub providers: Vec<String>,
  pub subscription_tier: SubscriptionTier,
  pub subscription_status: Option<String>,
  pub account_limits: AccountLimits,
  pub preferences: Map<String, Value>,
  pub created_at: DateTime<Utc>,
  pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
  pub fn is_premium(&self) -> bool {
    self.subscription_tier == SubscriptionTier::Premium
  }
}

/// Identity fields reported by the auth provider at sign-in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInProfile {
  pub uid: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub display_name: Option<String>,
  #[serde(default)]
  pub photo_url: Option<String>,
  #[serde(default)]
  pub providers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
  #[serde(default)]
  pub display_name: Option<String>,
  /// Top-level keys replace stored keys; keys not mentioned are kept.
  #[serde(default)]
  pub preferences: Option<Map<String, Value>>,
}

#[derive(Clone, PartialEq)]
pub struct OAuthTokenMaterial {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokenMaterial {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at.map(|at| at <= now).unwrap_or(false)
  }
}

impl std::fmt::Debug for OAuthTokenMaterial {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OAuthTokenMaterial")
      .field("access_token", &"<redacted>")
      .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
      .field("expires_at", &self.expires_at)
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialAccount {
  pub id: String,
  pub user_id: String,
  pub platform: SocialPlatform,
  pub platform_user_id: String,
  pub username: String,
  pub profile_picture_url: Option<String>,
  pub status: ConnectionStatus,
  #[serde(skip)]
  pub tokens: OAuthTokenMaterial,
  pub connected_at: DateTime<Utc>,
  pub last_synced_at: Option<DateTime<Utc>>,
}

/// Daily metrics stored per account. Absent fields were not reported for that day,
/// which is different from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsBag {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub followers: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subscribers: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub following: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub views: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub watch_time_hours: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub watch_time_minutes: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub engagement: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub impressions: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reach: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub profile_views: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub likes: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub comments: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub shares: Option<i64>,
  /// Seconds.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub average_view_duration: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subscribers_gained: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subscribers_lost: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub net_subscribers: Option<i64>,
}

macro_rules! merge_present {
  ($dst:ident, $src:ident; $($field:ident),+ $(,)?) => {
    $(
      if $src.$field.is_some() {
        $dst.$field = $src.$field;
      }
    )+
  };
}

impl MetricsBag {
  /// Overwrites fields present in `other`, keeps everything else.
  pub fn merge_from(&mut self, other: &MetricsBag) {
    merge_present!(self, other;
      followers, subscribers, following, views, watch_time_hours, watch_time_minutes,
      engagement, impressions, reach, profile_views, likes, comments, shares,
      average_view_duration, subscribers_gained, subscribers_lost, net_subscribers,
    );
  }

  pub fn is_empty(&self) -> bool {
    *self == MetricsBag::default()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsTimeSeries {
  pub day: NaiveDate,
  pub timestamp: DateTime<Utc>,
  pub platform: SocialPlatform,
  pub metrics: MetricsBag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetrics {
  pub likes: i64,
  pub comments: i64,
  #[serde(default)]
  pub shares: Option<i64>,
  #[serde(default)]
  pub views: Option<i64>,
  #[serde(default)]
  pub engagement_rate: Option<f64>,
  pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub user_id: String,
  pub account_id: String,
  pub platform: SocialPlatform,
  pub platform_post_id: String,
  pub published_at: DateTime<Utc>,
  #[serde(rename = "type")]
  pub post_type: String,
  #[serde(default)]
  pub text_content: Option<String>,
  #[serde(default)]
  pub media_urls: Vec<String>,
  #[serde(default)]
  pub permalink: Option<String>,
  #[serde(default)]
  pub latest_metrics: Option<PostMetrics>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn metrics_bag_omits_absent_fields_when_serialized() {
    let bag = MetricsBag {
      views: Some(100),
      watch_time_minutes: Some(30.0),
      watch_time_hours: Some(0.5),
      ..MetricsBag::default()
    };
    let json = serde_json::to_value(&bag).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"views": 100, "watchTimeMinutes": 30.0, "watchTimeHours": 0.5})
    );
  }

  #[test]
  fn merge_from_overwrites_present_fields_and_keeps_the_rest() {
    let mut stored = MetricsBag {
      views: Some(10),
      subscribers: Some(1_000),
      ..MetricsBag::default()
    };
    let incoming = MetricsBag {
      views: Some(12),
      likes: Some(3),
      ..MetricsBag::default()
    };
    stored.merge_from(&incoming);
    assert_eq!(stored.views, Some(12));
    assert_eq!(stored.likes, Some(3));
    assert_eq!(stored.subscribers, Some(1_000));
  }

  #[test]
  fn explicit_zero_survives_a_merge() {
    let mut stored = MetricsBag {
      shares: Some(7),
      ..MetricsBag::default()
    };
    stored.merge_from(&MetricsBag {
      shares: Some(0),
      ..MetricsBag::default()
    });
    assert_eq!(stored.shares, Some(0));
  }

  #[test]
  fn platform_parse_accepts_x_alias() {
    assert_eq!(SocialPlatform::parse("X"), Some(SocialPlatform::Twitter));
    assert_eq!(SocialPlatform::parse(" youtube "), Some(SocialPlatform::Youtube));
    assert_eq!(SocialPlatform::parse("tiktok"), None);
  }

  #[test]
  fn limits_follow_tier_defaults() {
    let free = AccountLimits::for_tier(SubscriptionTier::Free);
    assert_eq!(free.max_for(SocialPlatform::Linkedin), 0);
    assert_eq!(free.max_total, 2);
    let premium = AccountLimits::for_tier(SubscriptionTier::Premium);
    assert_eq!(premium.max_for(SocialPlatform::Twitter), 5);
    assert_eq!(premium.max_total, 20);
  }

  #[test]
  fn token_debug_output_is_redacted() {
    let tokens = OAuthTokenMaterial {
      access_token: "ya29.secret".to_string(),
      refresh_token: Some("1//refresh".to_string()),
      expires_at: None,
    };
    let out = format!("{tokens:?}");
    assert!(!out.contains("ya29.secret"));
    assert!(!out.contains("1//refresh"));
  }
}
