//! Reduces a date-bounded slice of time series and posts into dashboard data.
//!
//! Point-in-time totals (subscribers, followers) use the latest observed value;
//! period deltas (views, watch time, gained/lost) are summed. Average view
//! duration is recomputed from summed watch time and views.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{AnalyticsTimeSeries, ConnectionStatus, MetricsBag, Post, SocialAccount, SocialPlatform};
use crate::store::{AccountKey, AnalyticsStore, DateRange};

pub const DEFAULT_TOP_POSTS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeSummary {
  pub subscribers: Option<i64>,
  pub views: i64,
  pub watch_time_minutes: f64,
  pub watch_time_hours: f64,
  /// Seconds per view over the whole range.
  pub average_view_duration: Option<f64>,
  pub subscribers_gained: i64,
  pub subscribers_lost: i64,
  pub net_subscribers: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerSummary {
  pub followers: Option<i64>,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub impressions: i64,
  pub reach: i64,
  /// `(likes + comments + shares) / impressions`, when there were impressions.
  pub engagement_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlatformSummary {
  Youtube(YoutubeSummary),
  Followers(FollowerSummary),
}

fn latest<T: Copy>(series: &[AnalyticsTimeSeries], field: impl Fn(&MetricsBag) -> Option<T>) -> Option<T> {
  series
    .iter()
    .filter_map(|doc| field(&doc.metrics).map(|v| (doc.day, v)))
    .max_by_key(|(day, _)| *day)
    .map(|(_, v)| v)
}

fn sum_i64(series: &[AnalyticsTimeSeries], field: impl Fn(&MetricsBag) -> Option<i64>) -> i64 {
  series.iter().filter_map(|doc| field(&doc.metrics)).sum()
}

fn sum_f64(series: &[AnalyticsTimeSeries], field: impl Fn(&MetricsBag) -> Option<f64>) -> f64 {
  series.iter().filter_map(|doc| field(&doc.metrics)).sum()
}

pub fn summarize_youtube(series: &[AnalyticsTimeSeries]) -> YoutubeSummary {
  let views = sum_i64(series, |m| m.views);
  let watch_time_minutes = sum_f64(series, |m| m.watch_time_minutes);
  let subscribers_gained = sum_i64(series, |m| m.subscribers_gained);
  let subscribers_lost = sum_i64(series, |m| m.subscribers_lost);

  YoutubeSummary {
    subscribers: latest(series, |m| m.subscribers),
    views,
    watch_time_minutes,
    watch_time_hours: watch_time_minutes / 60.0,
    average_view_duration: (views > 0).then(|| watch_time_minutes * 60.0 / views as f64),
    subscribers_gained,
    subscribers_lost,
    net_subscribers: sum_i64(series, |m| m.net_subscribers),
  }
}

pub fn summarize_followers(series: &[AnalyticsTimeSeries]) -> FollowerSummary {
  let likes = sum_i64(series, |m| m.likes);
  let comments = sum_i64(series, |m| m.comments);
  let shares = sum_i64(series, |m| m.shares);
  let impressions = sum_i64(series, |m| m.impressions);

  FollowerSummary {
    followers: latest(series, |m| m.followers),
    likes,
    comments,
    shares,
    impressions,
    reach: sum_i64(series, |m| m.reach),
    engagement_rate: (impressions > 0).then(|| (likes + comments + shares) as f64 / impressions as f64),
  }
}

pub fn summarize(platform: SocialPlatform, series: &[AnalyticsTimeSeries]) -> PlatformSummary {
  match platform {
    SocialPlatform::Youtube => PlatformSummary::Youtube(summarize_youtube(series)),
    _ => PlatformSummary::Followers(summarize_followers(series)),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartMetric {
  Views,
  WatchTimeHours,
  Subscribers,
  NetSubscribers,
  Followers,
  Engagement,
  Impressions,
}

impl ChartMetric {
  pub fn for_platform(platform: SocialPlatform) -> &'static [ChartMetric] {
    match platform {
      SocialPlatform::Youtube => &[
        ChartMetric::Views,
        ChartMetric::WatchTimeHours,
        ChartMetric::Subscribers,
        ChartMetric::NetSubscribers,
      ],
      _ => &[ChartMetric::Followers, ChartMetric::Engagement, ChartMetric::Impressions],
    }
  }

  fn value(self, m: &MetricsBag) -> Option<f64> {
    match self {
      ChartMetric::Views => m.views.map(|v| v as f64),
      ChartMetric::WatchTimeHours => m.watch_time_hours,
      ChartMetric::Subscribers => m.subscribers.map(|v| v as f64),
      ChartMetric::NetSubscribers => m.net_subscribers.map(|v| v as f64),
      ChartMetric::Followers => m.followers.map(|v| v as f64),
      ChartMetric::Engagement => match (m.likes, m.comments, m.shares) {
        (None, None, None) => m.engagement.map(|v| v as f64),
        (l, c, s) => Some((l.unwrap_or(0) + c.unwrap_or(0) + s.unwrap_or(0)) as f64),
      },
      ChartMetric::Impressions => m.impressions.map(|v| v as f64),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
  pub date: NaiveDate,
  pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeries {
  pub metric: ChartMetric,
  pub points: Vec<ChartPoint>,
}

/// One point per stored day, oldest first. Days without the metric carry `None`.
pub fn chart_series(series: &[AnalyticsTimeSeries], metric: ChartMetric) -> ChartSeries {
  let mut docs: Vec<&AnalyticsTimeSeries> = series.iter().collect();
  docs.sort_by_key(|doc| doc.day);
  ChartSeries {
    metric,
    points: docs
      .into_iter()
      .map(|doc| ChartPoint {
        date: doc.day,
        value: metric.value(&doc.metrics),
      })
      .collect(),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PostMetric {
  Views,
  Likes,
  Comments,
  Shares,
  EngagementRate,
}

impl PostMetric {
  pub fn parse(input: &str) -> Option<Self> {
    match input {
      "views" => Some(PostMetric::Views),
      "likes" => Some(PostMetric::Likes),
      "comments" => Some(PostMetric::Comments),
      "shares" => Some(PostMetric::Shares),
      "engagementRate" | "engagement_rate" => Some(PostMetric::EngagementRate),
      _ => None,
    }
  }

  pub fn default_for(platform: SocialPlatform) -> Self {
    match platform {
      SocialPlatform::Youtube => PostMetric::Views,
      _ => PostMetric::Likes,
    }
  }

  fn value(self, post: &Post) -> Option<f64> {
    let m = post.latest_metrics.as_ref()?;
    match self {
      PostMetric::Views => m.views.map(|v| v as f64),
      PostMetric::Likes => Some(m.likes as f64),
      PostMetric::Comments => Some(m.comments as f64),
      PostMetric::Shares => m.shares.map(|v| v as f64),
      PostMetric::EngagementRate => m.engagement_rate,
    }
  }
}

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
  match (a, b) {
    (Some(x), Some(y)) => y.total_cmp(&x),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

/// Highest `metric` first; ties keep their input order. Posts without the metric
/// rank last.
pub fn top_posts(posts: &[Post], metric: PostMetric, limit: usize) -> Vec<Post> {
  let mut ranked: Vec<&Post> = posts.iter().collect();
  ranked.sort_by(|a, b| descending(metric.value(a), metric.value(b)));
  ranked.into_iter().take(limit).cloned().collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDashboard {
  pub platform: SocialPlatform,
  pub account: SocialAccount,
  pub range: DateRange,
  pub summary: PlatformSummary,
  pub charts: Vec<ChartSeries>,
  pub top_posts: Vec<Post>,
}

pub fn build_dashboard(
  account: SocialAccount,
  range: DateRange,
  series: &[AnalyticsTimeSeries],
  posts: &[Post],
  metric: PostMetric,
  limit: usize,
) -> PlatformDashboard {
  let platform = account.platform;
  let in_range: Vec<AnalyticsTimeSeries> = series.iter().filter(|doc| range.contains(doc.day)).cloned().collect();
  PlatformDashboard {
    platform,
    account,
    range,
    summary: summarize(platform, &in_range),
    charts: ChartMetric::for_platform(platform)
      .iter()
      .map(|m| chart_series(&in_range, *m))
      .collect(),
    top_posts: top_posts(posts, metric, limit),
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DashboardView {
  UpgradeRequired { platform: SocialPlatform },
  ConnectPrompt { platform: SocialPlatform },
  /// The account exists but its tokens can no longer be used.
  ReconnectPrompt { platform: SocialPlatform, account_id: String },
  Ready(Box<PlatformDashboard>),
  /// Inline error banner; the rest of the page still renders.
  Unavailable { message: String },
}

#[derive(Debug, Clone)]
pub struct DashboardQuery {
  pub platform: SocialPlatform,
  pub range: DateRange,
  /// Picks one of several connected accounts; the first one otherwise.
  pub account_id: Option<String>,
  pub post_metric: PostMetric,
  pub top_n: usize,
}

fn unavailable(e: impl std::fmt::Display) -> DashboardView {
  DashboardView::Unavailable {
    message: format!("Could not load analytics: {e}"),
  }
}

pub async fn load_platform_dashboard<S: AnalyticsStore>(store: &S, uid: &str, query: &DashboardQuery) -> DashboardView {
  let user = match store.fetch_user(uid).await {
    Ok(Some(user)) => user,
    Ok(None) => return unavailable(format!("user {uid} not found")),
    Err(e) => {
      tracing::error!(user_id = %uid, error = %e, "dashboard user lookup failed");
      return unavailable(e);
    }
  };

  // Tier gate comes before any connectivity check.
  if query.platform.is_premium_only() && !user.is_premium() {
    return DashboardView::UpgradeRequired {
      platform: query.platform,
    };
  }

  let accounts = match store.list_social_accounts(uid).await {
    Ok(accounts) => accounts,
    Err(e) => {
      tracing::error!(user_id = %uid, error = %e, "dashboard account lookup failed");
      return unavailable(e);
    }
  };
  let mut candidates: Vec<SocialAccount> = accounts
    .into_iter()
    .filter(|a| a.platform == query.platform)
    .filter(|a| query.account_id.as_deref().map(|id| id == a.id).unwrap_or(true))
    .collect();
  // Connected accounts win over ones waiting for reauthorization.
  candidates.sort_by_key(|a| a.status != ConnectionStatus::Connected);
  let Some(account) = candidates.into_iter().next() else {
    return DashboardView::ConnectPrompt {
      platform: query.platform,
    };
  };
  if account.status == ConnectionStatus::NeedsReauth {
    return DashboardView::ReconnectPrompt {
      platform: query.platform,
      account_id: account.id,
    };
  }

  let key = AccountKey::new(uid, &account.id);
  let series = match store.fetch_time_series(&key, query.range).await {
    Ok(series) => series,
    Err(e) => {
      tracing::error!(account_id = %account.id, error = %e, "dashboard time series query failed");
      return unavailable(e);
    }
  };
  let posts = match store.fetch_posts(&key, query.range).await {
    Ok(posts) => posts,
    Err(e) => {
      tracing::error!(account_id = %account.id, error = %e, "dashboard posts query failed");
      return unavailable(e);
    }
  };

  DashboardView::Ready(Box::new(build_dashboard(
    account,
    query.range,
    &series,
    &posts,
    query.post_metric,
    query.top_n,
  )))
}
