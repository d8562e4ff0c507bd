use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::{mysql::MySqlPoolOptions, MySql, MySqlPool, QueryBuilder};
use tokio::sync::OnceCell;
use vercel_runtime::Error;

use crate::config::database_url;
use crate::models::{
  AccountLimits, AnalyticsTimeSeries, ConnectionStatus, MetricsBag, OAuthTokenMaterial, Post, PostMetrics,
  ProfileSettings, SignInProfile, SocialAccount, SocialPlatform, SubscriptionTier, User,
};
use crate::normalize::DailyMetrics;
use crate::store::{day_start_utc, AccountKey, AnalyticsStore, DateRange, StoreError};

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

async fn ensure_schema(pool: &MySqlPool) -> Result<(), sqlx::Error> {
  // Keep schema creation idempotent; every cold start runs this once.
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS users (
        uid VARCHAR(128) PRIMARY KEY,
        email VARCHAR(320) NULL,
        display_name VARCHAR(255) NULL,
        photo_url TEXT NULL,
        providers_json TEXT NOT NULL,
        subscription_tier VARCHAR(16) NOT NULL DEFAULT 'free',
        subscription_status VARCHAR(32) NULL,
        max_instagram INT NOT NULL,
        max_youtube INT NOT NULL,
        max_linkedin INT NOT NULL,
        max_x INT NOT NULL,
        max_total INT NOT NULL,
        preferences_json TEXT NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        last_login_at TIMESTAMP(3) NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS social_accounts (
        id VARCHAR(191) NOT NULL,
        user_id VARCHAR(128) NOT NULL,
        platform VARCHAR(16) NOT NULL,
        platform_user_id VARCHAR(128) NOT NULL,
        username VARCHAR(255) NOT NULL,
        profile_picture_url TEXT NULL,
        status VARCHAR(16) NOT NULL,
        access_token TEXT NOT NULL,
        refresh_token TEXT NULL,
        token_expiry TIMESTAMP(3) NULL,
        connected_at TIMESTAMP(3) NOT NULL,
        last_synced_at TIMESTAMP(3) NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        PRIMARY KEY (user_id, id),
        UNIQUE KEY uq_social_accounts_platform (user_id, platform, platform_user_id)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS analytics_time_series (
        user_id VARCHAR(128) NOT NULL,
        account_id VARCHAR(191) NOT NULL,
        day DATE NOT NULL,
        platform VARCHAR(16) NOT NULL,
        ts TIMESTAMP(3) NOT NULL,
        metrics JSON NOT NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        PRIMARY KEY (user_id, account_id, day)
      );
    "#,
  )
  .execute(pool)
  .await?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS posts (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id VARCHAR(128) NOT NULL,
        account_id VARCHAR(191) NOT NULL,
        platform VARCHAR(16) NOT NULL,
        platform_post_id VARCHAR(191) NOT NULL,
        published_at TIMESTAMP(3) NOT NULL,
        post_type VARCHAR(32) NOT NULL,
        text_content TEXT NULL,
        media_urls_json TEXT NOT NULL,
        permalink TEXT NULL,
        likes BIGINT NULL,
        comments BIGINT NULL,
        shares BIGINT NULL,
        views BIGINT NULL,
        engagement_rate DOUBLE NULL,
        fetched_at TIMESTAMP(3) NULL,
        UNIQUE KEY uq_posts_platform (account_id, platform, platform_post_id),
        KEY idx_posts_owner (user_id, account_id, published_at)
      );
    "#,
  )
  .execute(pool)
  .await?;

  Ok(())
}

pub async fn get_pool() -> Result<&'static MySqlPool, Error> {
  POOL
    .get_or_try_init(|| async {
      let url = database_url().ok_or_else(|| -> Error {
        Box::new(std::io::Error::other(
          "Missing TIDB_DATABASE_URL (or DATABASE_URL)",
        ))
      })?;

      let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| -> Error { Box::new(e) })?;

      ensure_schema(&pool).await.map_err(|e| -> Error { Box::new(e) })?;
      tracing::debug!("database pool ready");
      Ok::<_, Error>(pool)
    })
    .await
}

#[derive(Debug, Clone)]
pub struct MySqlStore {
  pool: MySqlPool,
}

impl MySqlStore {
  pub fn new(pool: MySqlPool) -> Self {
    Self { pool }
  }

  pub async fn connect() -> Result<Self, Error> {
    Ok(Self::new(get_pool().await?.clone()))
  }
}

type UserRow = (
  String,
  Option<String>,
  Option<String>,
  Option<String>,
  String,
  String,
  Option<String>,
  i32,
  i32,
  i32,
  i32,
  i32,
  String,
  DateTime<Utc>,
  Option<DateTime<Utc>>,
);

const USER_COLUMNS: &str = "uid, email, display_name, photo_url, providers_json, subscription_tier, subscription_status, max_instagram, max_youtube, max_linkedin, max_x, max_total, preferences_json, created_at, last_login_at";

fn limit(v: i32) -> u32 {
  u32::try_from(v).unwrap_or(0)
}

fn corrupt(entity: &'static str, reason: impl ToString) -> StoreError {
  StoreError::Corrupt {
    entity,
    reason: reason.to_string(),
  }
}

fn user_from_row(row: UserRow) -> Result<User, StoreError> {
  let (
    uid,
    email,
    display_name,
    photo_url,
    providers_json,
    tier,
    subscription_status,
    max_instagram,
    max_youtube,
    max_linkedin,
    max_x,
    max_total,
    preferences_json,
    created_at,
    last_login_at,
  ) = row;

  let providers: Vec<String> = serde_json::from_str(&providers_json).map_err(|e| corrupt("user", e))?;
  let preferences: Map<String, Value> = serde_json::from_str(&preferences_json).map_err(|e| corrupt("user", e))?;
  let subscription_tier =
    SubscriptionTier::parse(&tier).ok_or_else(|| corrupt("user", format!("unknown tier {tier}")))?;

  Ok(User {
    uid,
    email,
    display_name,
    photo_url,
    providers,
    subscription_tier,
    subscription_status,
    account_limits: AccountLimits {
      max_instagram: limit(max_instagram),
      max_youtube: limit(max_youtube),
      max_linkedin: limit(max_linkedin),
      max_x: limit(max_x),
      max_total: limit(max_total),
    },
    preferences,
    created_at,
    last_login_at,
  })
}

type AccountRow = (
  String,
  String,
  String,
  String,
  String,
  Option<String>,
  String,
  String,
  Option<String>,
  Option<DateTime<Utc>>,
  DateTime<Utc>,
  Option<DateTime<Utc>>,
);

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, platform_user_id, username, profile_picture_url, status, access_token, refresh_token, token_expiry, connected_at, last_synced_at";

fn account_from_row(row: AccountRow) -> Result<SocialAccount, StoreError> {
  let (
    id,
    user_id,
    platform,
    platform_user_id,
    username,
    profile_picture_url,
    status,
    access_token,
    refresh_token,
    token_expiry,
    connected_at,
    last_synced_at,
  ) = row;

  Ok(SocialAccount {
    id,
    user_id,
    platform: SocialPlatform::parse(&platform)
      .ok_or_else(|| corrupt("social account", format!("unknown platform {platform}")))?,
    platform_user_id,
    username,
    profile_picture_url,
    status: ConnectionStatus::parse(&status)
      .ok_or_else(|| corrupt("social account", format!("unknown status {status}")))?,
    tokens: OAuthTokenMaterial {
      access_token,
      refresh_token,
      expires_at: token_expiry,
    },
    connected_at,
    last_synced_at,
  })
}

type PostRow = (
  String,
  String,
  String,
  String,
  DateTime<Utc>,
  String,
  Option<String>,
  String,
  Option<String>,
  Option<i64>,
  Option<i64>,
  Option<i64>,
  Option<i64>,
  Option<f64>,
  Option<DateTime<Utc>>,
);

fn post_from_row(row: PostRow) -> Result<Post, StoreError> {
  let (
    user_id,
    account_id,
    platform,
    platform_post_id,
    published_at,
    post_type,
    text_content,
    media_urls_json,
    permalink,
    likes,
    comments,
    shares,
    views,
    engagement_rate,
    fetched_at,
  ) = row;

  let media_urls: Vec<String> = serde_json::from_str(&media_urls_json).map_err(|e| corrupt("post", e))?;
  let latest_metrics = fetched_at.map(|fetched_at| PostMetrics {
    likes: likes.unwrap_or(0),
    comments: comments.unwrap_or(0),
    shares,
    views,
    engagement_rate,
    fetched_at,
  });

  Ok(Post {
    user_id,
    account_id,
    platform: SocialPlatform::parse(&platform).ok_or_else(|| corrupt("post", format!("unknown platform {platform}")))?,
    platform_post_id,
    published_at,
    post_type,
    text_content,
    media_urls,
    permalink,
    latest_metrics,
  })
}

impl AnalyticsStore for MySqlStore {
  async fn fetch_user(&self, uid: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE uid = ? LIMIT 1;"))
      .bind(uid)
      .fetch_optional(&self.pool)
      .await?;
    row.map(user_from_row).transpose()
  }

  async fn upsert_user_on_sign_in(&self, profile: &SignInProfile, now: DateTime<Utc>) -> Result<User, StoreError> {
    let limits = AccountLimits::free();
    let providers_json = serde_json::to_string(&profile.providers).map_err(|e| corrupt("user", e))?;

    // Tier, limits and preferences are only written when the row is created.
    sqlx::query(
      r#"
        INSERT INTO users
          (uid, email, display_name, photo_url, providers_json, subscription_tier,
           max_instagram, max_youtube, max_linkedin, max_x, max_total, preferences_json,
           created_at, last_login_at)
        VALUES
          (?, ?, ?, ?, ?, 'free', ?, ?, ?, ?, ?, '{}', ?, ?)
        ON DUPLICATE KEY UPDATE
          email = VALUES(email),
          display_name = VALUES(display_name),
          photo_url = VALUES(photo_url),
          providers_json = VALUES(providers_json),
          last_login_at = VALUES(last_login_at);
      "#,
    )
    .bind(&profile.uid)
    .bind(profile.email.as_deref())
    .bind(profile.display_name.as_deref())
    .bind(profile.photo_url.as_deref())
    .bind(providers_json)
    .bind(limits.max_instagram as i32)
    .bind(limits.max_youtube as i32)
    .bind(limits.max_linkedin as i32)
    .bind(limits.max_x as i32)
    .bind(limits.max_total as i32)
    .bind(now)
    .bind(now)
    .execute(&self.pool)
    .await?;

    self.fetch_user(&profile.uid).await?.ok_or_else(|| StoreError::NotFound {
      entity: "user",
      id: profile.uid.clone(),
    })
  }

  async fn save_profile_settings(&self, uid: &str, settings: &ProfileSettings) -> Result<User, StoreError> {
    let mut tx = self.pool.begin().await?;

    let row = sqlx::query_as::<_, (String,)>("SELECT preferences_json FROM users WHERE uid = ? FOR UPDATE;")
      .bind(uid)
      .fetch_optional(&mut *tx)
      .await?;
    let Some((preferences_json,)) = row else {
      return Err(StoreError::NotFound {
        entity: "user",
        id: uid.to_string(),
      });
    };

    let mut preferences: Map<String, Value> =
      serde_json::from_str(&preferences_json).map_err(|e| corrupt("user", e))?;
    if let Some(update) = settings.preferences.as_ref() {
      for (k, v) in update.iter() {
        preferences.insert(k.clone(), v.clone());
      }
    }
    let preferences_json = serde_json::to_string(&preferences).map_err(|e| corrupt("user", e))?;

    sqlx::query(
      r#"
        UPDATE users
        SET display_name = COALESCE(?, display_name),
            preferences_json = ?
        WHERE uid = ?;
      "#,
    )
    .bind(settings.display_name.as_deref())
    .bind(preferences_json)
    .bind(uid)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    self.fetch_user(uid).await?.ok_or_else(|| StoreError::NotFound {
      entity: "user",
      id: uid.to_string(),
    })
  }

  async fn list_social_accounts(&self, uid: &str) -> Result<Vec<SocialAccount>, StoreError> {
    let rows = sqlx::query_as::<_, AccountRow>(&format!(
      "SELECT {ACCOUNT_COLUMNS} FROM social_accounts WHERE user_id = ? ORDER BY connected_at ASC, id ASC;"
    ))
    .bind(uid)
    .fetch_all(&self.pool)
    .await?;
    rows.into_iter().map(account_from_row).collect()
  }

  async fn fetch_social_account(&self, key: &AccountKey) -> Result<Option<SocialAccount>, StoreError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
      "SELECT {ACCOUNT_COLUMNS} FROM social_accounts WHERE user_id = ? AND id = ? LIMIT 1;"
    ))
    .bind(&key.user_id)
    .bind(&key.account_id)
    .fetch_optional(&self.pool)
    .await?;
    row.map(account_from_row).transpose()
  }

  async fn save_social_account(&self, account: &SocialAccount) -> Result<(), StoreError> {
    sqlx::query(
      r#"
        INSERT INTO social_accounts
          (id, user_id, platform, platform_user_id, username, profile_picture_url, status,
           access_token, refresh_token, token_expiry, connected_at, last_synced_at)
        VALUES
          (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          username = VALUES(username),
          profile_picture_url = VALUES(profile_picture_url),
          status = VALUES(status),
          access_token = VALUES(access_token),
          refresh_token = COALESCE(VALUES(refresh_token), refresh_token),
          token_expiry = VALUES(token_expiry),
          last_synced_at = COALESCE(VALUES(last_synced_at), last_synced_at);
      "#,
    )
    .bind(&account.id)
    .bind(&account.user_id)
    .bind(account.platform.as_str())
    .bind(&account.platform_user_id)
    .bind(&account.username)
    .bind(account.profile_picture_url.as_deref())
    .bind(account.status.as_str())
    .bind(&account.tokens.access_token)
    .bind(account.tokens.refresh_token.as_deref())
    .bind(account.tokens.expires_at)
    .bind(account.connected_at)
    .bind(account.last_synced_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn update_account_tokens(
    &self,
    key: &AccountKey,
    tokens: &OAuthTokenMaterial,
    status: ConnectionStatus,
  ) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
        UPDATE social_accounts
        SET access_token = ?,
            refresh_token = COALESCE(?, refresh_token),
            token_expiry = ?,
            status = ?
        WHERE user_id = ? AND id = ?;
      "#,
    )
    .bind(&tokens.access_token)
    .bind(tokens.refresh_token.as_deref())
    .bind(tokens.expires_at)
    .bind(status.as_str())
    .bind(&key.user_id)
    .bind(&key.account_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound {
        entity: "social account",
        id: key.account_id.clone(),
      });
    }
    Ok(())
  }

  async fn touch_last_synced(&self, key: &AccountKey, at: DateTime<Utc>) -> Result<(), StoreError> {
    sqlx::query("UPDATE social_accounts SET last_synced_at = ? WHERE user_id = ? AND id = ?;")
      .bind(at)
      .bind(&key.user_id)
      .bind(&key.account_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn delete_social_account(&self, key: &AccountKey) -> Result<bool, StoreError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM analytics_time_series WHERE user_id = ? AND account_id = ?;")
      .bind(&key.user_id)
      .bind(&key.account_id)
      .execute(&mut *tx)
      .await?;
    sqlx::query("DELETE FROM posts WHERE user_id = ? AND account_id = ?;")
      .bind(&key.user_id)
      .bind(&key.account_id)
      .execute(&mut *tx)
      .await?;
    let deleted = sqlx::query("DELETE FROM social_accounts WHERE user_id = ? AND id = ?;")
      .bind(&key.user_id)
      .bind(&key.account_id)
      .execute(&mut *tx)
      .await?
      .rows_affected();

    tx.commit().await?;
    Ok(deleted > 0)
  }

  async fn upsert_time_series(
    &self,
    key: &AccountKey,
    platform: SocialPlatform,
    days: &[DailyMetrics],
    chunk_rows: usize,
  ) -> Result<usize, StoreError> {
    if days.is_empty() {
      return Ok(0);
    }

    let encoded: Vec<(NaiveDate, String)> = days
      .iter()
      .map(|d| {
        serde_json::to_string(&d.metrics)
          .map(|json| (d.day, json))
          .map_err(|e| corrupt("time series", e))
      })
      .collect::<Result<_, _>>()?;

    // One transaction for the whole run; chunking only bounds statement size.
    let mut tx = self.pool.begin().await?;
    for chunk in encoded.chunks(chunk_rows.max(1)) {
      let mut qb: QueryBuilder<MySql> =
        QueryBuilder::new("INSERT INTO analytics_time_series (user_id, account_id, day, platform, ts, metrics) ");
      qb.push_values(chunk.iter(), |mut b, (day, metrics_json)| {
        b.push_bind(key.user_id.clone())
          .push_bind(key.account_id.clone())
          .push_bind(*day)
          .push_bind(platform.as_str())
          .push_bind(day_start_utc(*day))
          .push_bind(metrics_json.clone());
      });
      qb.push(
        " ON DUPLICATE KEY UPDATE platform = VALUES(platform), ts = VALUES(ts), metrics = JSON_MERGE_PATCH(metrics, VALUES(metrics)), updated_at = CURRENT_TIMESTAMP(3)",
      );
      qb.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(days.len())
  }

  async fn fetch_time_series(&self, key: &AccountKey, range: DateRange) -> Result<Vec<AnalyticsTimeSeries>, StoreError> {
    let rows = sqlx::query_as::<_, (NaiveDate, String, DateTime<Utc>, String)>(
      r#"
        SELECT day, platform, ts, CAST(metrics AS CHAR)
        FROM analytics_time_series
        WHERE user_id = ?
          AND account_id = ?
          AND day BETWEEN ? AND ?
        ORDER BY day ASC;
      "#,
    )
    .bind(&key.user_id)
    .bind(&key.account_id)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(&self.pool)
    .await?;

    rows
      .into_iter()
      .map(|(day, platform, timestamp, metrics_json)| {
        let metrics: MetricsBag = serde_json::from_str(&metrics_json).map_err(|e| corrupt("time series", e))?;
        Ok(AnalyticsTimeSeries {
          day,
          timestamp,
          platform: SocialPlatform::parse(&platform)
            .ok_or_else(|| corrupt("time series", format!("unknown platform {platform}")))?,
          metrics,
        })
      })
      .collect()
  }

  async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
    let media_urls_json = serde_json::to_string(&post.media_urls).map_err(|e| corrupt("post", e))?;
    let m = post.latest_metrics.as_ref();

    sqlx::query(
      r#"
        INSERT INTO posts
          (user_id, account_id, platform, platform_post_id, published_at, post_type, text_content,
           media_urls_json, permalink, likes, comments, shares, views, engagement_rate, fetched_at)
        VALUES
          (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
          published_at = VALUES(published_at),
          post_type = VALUES(post_type),
          text_content = VALUES(text_content),
          media_urls_json = VALUES(media_urls_json),
          permalink = VALUES(permalink),
          likes = VALUES(likes),
          comments = VALUES(comments),
          shares = VALUES(shares),
          views = VALUES(views),
          engagement_rate = VALUES(engagement_rate),
          fetched_at = VALUES(fetched_at);
      "#,
    )
    .bind(&post.user_id)
    .bind(&post.account_id)
    .bind(post.platform.as_str())
    .bind(&post.platform_post_id)
    .bind(post.published_at)
    .bind(&post.post_type)
    .bind(post.text_content.as_deref())
    .bind(media_urls_json)
    .bind(post.permalink.as_deref())
    .bind(m.map(|m| m.likes))
    .bind(m.map(|m| m.comments))
    .bind(m.and_then(|m| m.shares))
    .bind(m.and_then(|m| m.views))
    .bind(m.and_then(|m| m.engagement_rate))
    .bind(m.map(|m| m.fetched_at))
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn fetch_posts(&self, key: &AccountKey, range: DateRange) -> Result<Vec<Post>, StoreError> {
    let (from, to) = range.instant_bounds();
    let rows = sqlx::query_as::<_, PostRow>(
      r#"
        SELECT user_id, account_id, platform, platform_post_id, published_at, post_type, text_content,
               media_urls_json, permalink, likes, comments, shares, views, engagement_rate, fetched_at
        FROM posts
        WHERE user_id = ?
          AND account_id = ?
          AND published_at >= ?
          AND published_at < ?
        ORDER BY published_at DESC, id ASC;
      "#,
    )
    .bind(&key.user_id)
    .bind(&key.account_id)
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(post_from_row).collect()
  }
}
