use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::channel_resolver::ResolvedIdentity;
use crate::error::IngestError;
use crate::ingest::{fetch_initial_youtube_stats, IngestOptions, IngestRequest, IngestResponse};
use crate::models::{ConnectionStatus, OAuthTokenMaterial, SocialAccount, SocialPlatform};
use crate::providers::youtube::{refresh_tokens, YoutubeOAuthClient};
use crate::store::{AccountKey, AnalyticsStore, StoreError};
use crate::tier::{check_can_connect, ConnectDenied};

/// Tokens expiring within this margin are refreshed before use.
const REFRESH_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum AccountError {
  #[error("user not found: {0}")]
  UserNotFound(String),

  #[error("social account not found: {0}")]
  AccountNotFound(String),

  #[error(transparent)]
  Denied(#[from] ConnectDenied),

  #[error("account {0} needs to be reconnected")]
  NeedsReauth(String),

  #[error("token refresh failed: {0}")]
  Refresh(String),

  #[error(transparent)]
  Ingest(#[from] IngestError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Deterministic so reconnecting the same channel updates the existing account.
pub fn account_id_for(platform: SocialPlatform, platform_user_id: &str) -> String {
  format!("{}-{}", platform.as_str(), platform_user_id.trim())
}

#[derive(Debug, Clone)]
pub struct NewConnection {
  pub platform: SocialPlatform,
  pub identity: ResolvedIdentity,
  pub tokens: OAuthTokenMaterial,
}

/// Creates the account after the tier check, or refreshes identity and tokens of an
/// already connected one. Sign-in fallback identities are stored as `needs_reauth`
/// and are replaced once the same sign-in resolves to its channel.
pub async fn connect_account<S: AnalyticsStore>(
  store: &S,
  uid: &str,
  conn: NewConnection,
  now: DateTime<Utc>,
) -> Result<SocialAccount, AccountError> {
  let user = store
    .fetch_user(uid)
    .await?
    .ok_or_else(|| AccountError::UserNotFound(uid.to_string()))?;
  let existing = store.list_social_accounts(uid).await?;

  let id = account_id_for(conn.platform, &conn.identity.platform_user_id);
  let status = if conn.identity.is_channel() {
    ConnectionStatus::Connected
  } else {
    ConnectionStatus::NeedsReauth
  };

  // Placeholders left by an earlier sign-in fallback give up their slot to the
  // real channel of the same sign-in.
  let replaced: Vec<&SocialAccount> = if conn.identity.is_channel() {
    existing
      .iter()
      .filter(|a| {
        a.platform == conn.platform
          && a.status == ConnectionStatus::NeedsReauth
          && a.id != id
          && a.platform_user_id == conn.identity.sign_in_user_id
      })
      .collect()
  } else {
    Vec::new()
  };

  let account = match existing.iter().find(|a| a.id == id) {
    Some(current) => {
      let mut tokens = conn.tokens;
      if tokens.refresh_token.is_none() {
        tokens.refresh_token = current.tokens.refresh_token.clone();
      }
      SocialAccount {
        username: conn.identity.username,
        profile_picture_url: conn.identity.avatar_url,
        status,
        tokens,
        ..current.clone()
      }
    }
    None => {
      let counted: Vec<SocialAccount> = existing
        .iter()
        .filter(|a| !replaced.iter().any(|r| r.id == a.id))
        .cloned()
        .collect();
      check_can_connect(&user, &counted, conn.platform)?;
      SocialAccount {
        id,
        user_id: uid.to_string(),
        platform: conn.platform,
        platform_user_id: conn.identity.platform_user_id,
        username: conn.identity.username,
        profile_picture_url: conn.identity.avatar_url,
        status,
        tokens: conn.tokens,
        connected_at: now,
        last_synced_at: None,
      }
    }
  };

  store.save_social_account(&account).await?;
  for placeholder in replaced {
    store
      .delete_social_account(&AccountKey::new(uid, &placeholder.id))
      .await?;
    tracing::info!(
      user_id = %uid,
      account_id = %placeholder.id,
      replaced_by = %account.id,
      "sign-in fallback account replaced by channel"
    );
  }
  tracing::info!(
    user_id = %uid,
    account_id = %account.id,
    platform = %account.platform,
    status = account.status.as_str(),
    "social account connected"
  );
  Ok(account)
}

/// Removes the account with its time series and posts.
pub async fn disconnect_account<S: AnalyticsStore>(store: &S, key: &AccountKey) -> Result<(), AccountError> {
  if !store.delete_social_account(key).await? {
    return Err(AccountError::AccountNotFound(key.account_id.clone()));
  }
  tracing::info!(user_id = %key.user_id, account_id = %key.account_id, "social account disconnected");
  Ok(())
}

pub trait TokenRefresher: Send + Sync {
  fn refresh(
    &self,
    refresh_token: &str,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<OAuthTokenMaterial, vercel_runtime::Error>> + Send;
}

impl TokenRefresher for YoutubeOAuthClient {
  async fn refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<OAuthTokenMaterial, vercel_runtime::Error> {
    Ok(refresh_tokens(self, refresh_token).await?.into_material(now))
  }
}

/// Returns a usable access token, refreshing and persisting new token material
/// when the stored one is expired. A failed or impossible refresh marks the
/// account `needs_reauth`.
pub async fn fresh_access_token<S: AnalyticsStore, R: TokenRefresher>(
  store: &S,
  account: &SocialAccount,
  refresher: &R,
  now: DateTime<Utc>,
) -> Result<String, AccountError> {
  if !account.tokens.is_expired(now + Duration::seconds(REFRESH_SKEW_SECONDS)) {
    return Ok(account.tokens.access_token.clone());
  }

  let key = AccountKey::new(&account.user_id, &account.id);
  let Some(refresh_token) = account.tokens.refresh_token.as_deref() else {
    store
      .update_account_tokens(&key, &account.tokens, ConnectionStatus::NeedsReauth)
      .await?;
    return Err(AccountError::NeedsReauth(account.id.clone()));
  };

  match refresher.refresh(refresh_token, now).await {
    Ok(mut tokens) => {
      if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(refresh_token.to_string());
      }
      store
        .update_account_tokens(&key, &tokens, ConnectionStatus::Connected)
        .await?;
      tracing::debug!(account_id = %account.id, "access token refreshed");
      Ok(tokens.access_token)
    }
    Err(e) => {
      tracing::warn!(account_id = %account.id, error = %e, "access token refresh failed");
      store
        .update_account_tokens(&key, &account.tokens, ConnectionStatus::NeedsReauth)
        .await?;
      Err(AccountError::Refresh(e.to_string()))
    }
  }
}

/// Re-runs ingestion for a stored YouTube account, refreshing its token first.
pub async fn ingest_stored_account<S: AnalyticsStore, R: TokenRefresher>(
  store: &S,
  key: &AccountKey,
  refresher: &R,
  opts: &IngestOptions,
  now: DateTime<Utc>,
) -> Result<IngestResponse, AccountError> {
  let account = store
    .fetch_social_account(key)
    .await?
    .ok_or_else(|| AccountError::AccountNotFound(key.account_id.clone()))?;
  if account.platform != SocialPlatform::Youtube || account.status == ConnectionStatus::NeedsReauth {
    return Err(AccountError::NeedsReauth(account.id));
  }

  let access_token = fresh_access_token(store, &account, refresher, now).await?;
  let req = IngestRequest {
    user_id: account.user_id.clone(),
    social_account_id: account.id.clone(),
    access_token,
    youtube_channel_id: account.platform_user_id.clone(),
  };
  Ok(fetch_initial_youtube_stats(store, &req, opts, now).await?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel_resolver::IdentitySource;
  use crate::memory_store::MemoryStore;
  use crate::models::{MetricsBag, SignInProfile};
  use crate::normalize::DailyMetrics;
  use crate::store::DateRange;
  use chrono::{NaiveDate, TimeZone};
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
  }

  async fn store_with_user() -> MemoryStore {
    let store = MemoryStore::new();
    store
      .upsert_user_on_sign_in(
        &SignInProfile {
          uid: "u1".to_string(),
          email: Some("ada@example.com".to_string()),
          display_name: Some("Ada".to_string()),
          photo_url: None,
          providers: vec!["google.com".to_string()],
        },
        now(),
      )
      .await
      .unwrap();
    store
  }

  fn connection(channel_id: &str, source: IdentitySource, refresh: Option<&str>) -> NewConnection {
    NewConnection {
      platform: SocialPlatform::Youtube,
      identity: ResolvedIdentity {
        platform_user_id: channel_id.to_string(),
        username: "Ada's Channel".to_string(),
        avatar_url: None,
        source,
        sign_in_user_id: "google-sub-1".to_string(),
      },
      tokens: OAuthTokenMaterial {
        access_token: "ya29.first".to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at: Some(now() + Duration::hours(1)),
      },
    }
  }

  struct FakeRefresher {
    calls: AtomicUsize,
    fail: bool,
  }

  impl FakeRefresher {
    fn new(fail: bool) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail,
      }
    }
  }

  impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<OAuthTokenMaterial, vercel_runtime::Error> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(Box::new(std::io::Error::other("invalid_grant")));
      }
      assert_eq!(refresh_token, "1//refresh");
      Ok(OAuthTokenMaterial {
        access_token: "ya29.fresh".to_string(),
        refresh_token: None,
        expires_at: Some(now + Duration::hours(1)),
      })
    }
  }

  #[tokio::test]
  async fn connect_creates_account_with_deterministic_id() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();
    assert_eq!(account.id, "youtube-UC123");
    assert_eq!(account.status, ConnectionStatus::Connected);
    assert_eq!(store.list_social_accounts("u1").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn reconnect_updates_tokens_without_hitting_limits() {
    let store = store_with_user().await;
    connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();

    let mut again = connection("UC123", IdentitySource::Channel, None);
    again.tokens.access_token = "ya29.second".to_string();
    let account = connect_account(&store, "u1", again, now()).await.unwrap();

    assert_eq!(account.tokens.access_token, "ya29.second");
    assert_eq!(account.tokens.refresh_token.as_deref(), Some("1//refresh"));
    assert_eq!(account.connected_at, now());
    assert_eq!(store.list_social_accounts("u1").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn second_youtube_channel_is_denied_on_free_tier() {
    let store = store_with_user().await;
    connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, None), now())
      .await
      .unwrap();
    let err = connect_account(&store, "u1", connection("UC999", IdentitySource::Channel, None), now())
      .await
      .unwrap_err();
    assert!(matches!(err, AccountError::Denied(ConnectDenied::PlatformLimitReached { .. })));
  }

  #[tokio::test]
  async fn fallback_identity_is_stored_as_needs_reauth() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("google-sub", IdentitySource::SignInFallback, None), now())
      .await
      .unwrap();
    assert_eq!(account.status, ConnectionStatus::NeedsReauth);
  }

  #[tokio::test]
  async fn channel_replaces_fallback_placeholder_on_free_tier() {
    let store = store_with_user().await;
    connect_account(&store, "u1", connection("google-sub-1", IdentitySource::SignInFallback, None), now())
      .await
      .unwrap();

    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();

    assert_eq!(account.id, "youtube-UC123");
    assert_eq!(account.status, ConnectionStatus::Connected);
    let accounts = store.list_social_accounts("u1").await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, "youtube-UC123");
  }

  #[tokio::test]
  async fn fallback_of_another_sign_in_still_counts() {
    let store = store_with_user().await;
    connect_account(&store, "u1", connection("google-sub-2", IdentitySource::SignInFallback, None), now())
      .await
      .unwrap();

    let err = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, None), now())
      .await
      .unwrap_err();
    assert!(matches!(err, AccountError::Denied(ConnectDenied::PlatformLimitReached { .. })));
    assert_eq!(store.list_social_accounts("u1").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn unknown_user_cannot_connect() {
    let store = MemoryStore::new();
    let err = connect_account(&store, "ghost", connection("UC123", IdentitySource::Channel, None), now())
      .await
      .unwrap_err();
    assert!(matches!(err, AccountError::UserNotFound(_)));
  }

  #[tokio::test]
  async fn disconnect_cascades_time_series() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, None), now())
      .await
      .unwrap();
    let key = AccountKey::new("u1", &account.id);
    let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
    store
      .upsert_time_series(
        &key,
        SocialPlatform::Youtube,
        &[DailyMetrics {
          day,
          metrics: MetricsBag {
            views: Some(1),
            ..MetricsBag::default()
          },
        }],
        200,
      )
      .await
      .unwrap();

    disconnect_account(&store, &key).await.unwrap();
    assert!(store.list_social_accounts("u1").await.unwrap().is_empty());
    let range = DateRange::new(day, day).unwrap();
    assert!(store.fetch_time_series(&key, range).await.unwrap().is_empty());

    let err = disconnect_account(&store, &key).await.unwrap_err();
    assert!(matches!(err, AccountError::AccountNotFound(_)));
  }

  #[tokio::test]
  async fn valid_token_is_returned_without_refresh() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();
    let refresher = FakeRefresher::new(false);
    let token = fresh_access_token(&store, &account, &refresher, now()).await.unwrap();
    assert_eq!(token, "ya29.first");
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn expired_token_is_refreshed_and_persisted() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();
    let later = now() + Duration::hours(2);
    let refresher = FakeRefresher::new(false);

    let token = fresh_access_token(&store, &account, &refresher, later).await.unwrap();
    assert_eq!(token, "ya29.fresh");

    let stored = store
      .fetch_social_account(&AccountKey::new("u1", &account.id))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.tokens.access_token, "ya29.fresh");
    assert_eq!(stored.tokens.refresh_token.as_deref(), Some("1//refresh"));
    assert_eq!(stored.status, ConnectionStatus::Connected);
  }

  #[tokio::test]
  async fn failed_refresh_marks_account_for_reauth() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("UC123", IdentitySource::Channel, Some("1//refresh")), now())
      .await
      .unwrap();
    let refresher = FakeRefresher::new(true);

    let err = fresh_access_token(&store, &account, &refresher, now() + Duration::hours(2))
      .await
      .unwrap_err();
    assert!(matches!(err, AccountError::Refresh(_)));

    let stored = store
      .fetch_social_account(&AccountKey::new("u1", &account.id))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.status, ConnectionStatus::NeedsReauth);
  }

  #[tokio::test]
  async fn stored_fallback_account_is_not_ingested() {
    let store = store_with_user().await;
    let account = connect_account(&store, "u1", connection("google-sub", IdentitySource::SignInFallback, None), now())
      .await
      .unwrap();
    let opts = IngestOptions {
      analytics_base_url: "http://127.0.0.1:9/".to_string(),
      data_base_url: None,
      window: crate::ingest::IngestWindow::rolling(now().date_naive(), 90),
      write_chunk_rows: 200,
    };
    let err = ingest_stored_account(&store, &AccountKey::new("u1", &account.id), &FakeRefresher::new(false), &opts, now())
      .await
      .unwrap_err();
    assert!(matches!(err, AccountError::NeedsReauth(_)));
  }
}
