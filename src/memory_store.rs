use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{
  AccountLimits, AnalyticsTimeSeries, ConnectionStatus, MetricsBag, OAuthTokenMaterial, Post, ProfileSettings,
  SignInProfile, SocialAccount, SocialPlatform, SubscriptionTier, User,
};
use crate::normalize::DailyMetrics;
use crate::store::{day_start_utc, AccountKey, AnalyticsStore, DateRange, StoreError};

#[derive(Default)]
struct State {
  users: BTreeMap<String, User>,
  // Insertion order is kept so listing mirrors creation order.
  accounts: Vec<SocialAccount>,
  series: BTreeMap<(AccountKey, NaiveDate), AnalyticsTimeSeries>,
  posts: Vec<Post>,
}

/// Process-local store with the same merge and atomicity rules as the MySQL store.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<State>,
  reject_next_batch: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Makes the next time-series batch fail before anything is applied.
  pub fn reject_next_batch(&self) {
    self.reject_next_batch.store(true, Ordering::SeqCst);
  }

  pub fn insert_user(&self, user: User) {
    self.lock().users.insert(user.uid.clone(), user);
  }

  pub fn time_series_len(&self) -> usize {
    self.lock().series.len()
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    // A poisoned lock only means another test thread panicked mid-write.
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl AnalyticsStore for MemoryStore {
  async fn fetch_user(&self, uid: &str) -> Result<Option<User>, StoreError> {
    Ok(self.lock().users.get(uid).cloned())
  }

  async fn upsert_user_on_sign_in(&self, profile: &SignInProfile, now: DateTime<Utc>) -> Result<User, StoreError> {
    let mut state = self.lock();
    let user = state.users.entry(profile.uid.clone()).or_insert_with(|| User {
      uid: profile.uid.clone(),
      email: None,
      display_name: None,
      photo_url: None,
      providers: Vec::new(),
      subscription_tier: SubscriptionTier::Free,
      subscription_status: None,
      account_limits: AccountLimits::free(),
      preferences: Default::default(),
      created_at: now,
      last_login_at: None,
    });
    user.email = profile.email.clone();
    user.display_name = profile.display_name.clone();
    user.photo_url = profile.photo_url.clone();
    user.providers = profile.providers.clone();
    user.last_login_at = Some(now);
    Ok(user.clone())
  }

  async fn save_profile_settings(&self, uid: &str, settings: &ProfileSettings) -> Result<User, StoreError> {
    let mut state = self.lock();
    let user = state.users.get_mut(uid).ok_or_else(|| StoreError::NotFound {
      entity: "user",
      id: uid.to_string(),
    })?;
    if let Some(name) = settings.display_name.as_ref() {
      user.display_name = Some(name.clone());
    }
    if let Some(prefs) = settings.preferences.as_ref() {
      for (k, v) in prefs.iter() {
        user.preferences.insert(k.clone(), v.clone());
      }
    }
    Ok(user.clone())
  }

  async fn list_social_accounts(&self, uid: &str) -> Result<Vec<SocialAccount>, StoreError> {
    Ok(self.lock().accounts.iter().filter(|a| a.user_id == uid).cloned().collect())
  }

  async fn fetch_social_account(&self, key: &AccountKey) -> Result<Option<SocialAccount>, StoreError> {
    Ok(
      self
        .lock()
        .accounts
        .iter()
        .find(|a| a.user_id == key.user_id && a.id == key.account_id)
        .cloned(),
    )
  }

  async fn save_social_account(&self, account: &SocialAccount) -> Result<(), StoreError> {
    let mut state = self.lock();
    match state
      .accounts
      .iter_mut()
      .find(|a| a.user_id == account.user_id && a.id == account.id)
    {
      Some(existing) => *existing = account.clone(),
      None => state.accounts.push(account.clone()),
    }
    Ok(())
  }

  async fn update_account_tokens(
    &self,
    key: &AccountKey,
    tokens: &OAuthTokenMaterial,
    status: ConnectionStatus,
  ) -> Result<(), StoreError> {
    let mut state = self.lock();
    let account = state
      .accounts
      .iter_mut()
      .find(|a| a.user_id == key.user_id && a.id == key.account_id)
      .ok_or_else(|| StoreError::NotFound {
        entity: "social account",
        id: key.account_id.clone(),
      })?;
    account.tokens.access_token = tokens.access_token.clone();
    if tokens.refresh_token.is_some() {
      account.tokens.refresh_token = tokens.refresh_token.clone();
    }
    account.tokens.expires_at = tokens.expires_at;
    account.status = status;
    Ok(())
  }

  async fn touch_last_synced(&self, key: &AccountKey, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut state = self.lock();
    if let Some(account) = state
      .accounts
      .iter_mut()
      .find(|a| a.user_id == key.user_id && a.id == key.account_id)
    {
      account.last_synced_at = Some(at);
    }
    Ok(())
  }

  async fn delete_social_account(&self, key: &AccountKey) -> Result<bool, StoreError> {
    let mut state = self.lock();
    let before = state.accounts.len();
    state
      .accounts
      .retain(|a| !(a.user_id == key.user_id && a.id == key.account_id));
    let existed = state.accounts.len() != before;
    state.series.retain(|(k, _), _| k != key);
    state
      .posts
      .retain(|p| !(p.user_id == key.user_id && p.account_id == key.account_id));
    Ok(existed)
  }

  async fn upsert_time_series(
    &self,
    key: &AccountKey,
    platform: SocialPlatform,
    days: &[DailyMetrics],
    _chunk_rows: usize,
  ) -> Result<usize, StoreError> {
    if self.reject_next_batch.swap(false, Ordering::SeqCst) {
      return Err(StoreError::BatchRejected("injected failure".to_string()));
    }

    let mut state = self.lock();
    // Stage every merged document first so the batch applies all-or-nothing.
    let staged: Vec<((AccountKey, NaiveDate), AnalyticsTimeSeries)> = days
      .iter()
      .map(|d| {
        let id = (key.clone(), d.day);
        let mut metrics: MetricsBag = state.series.get(&id).map(|doc| doc.metrics.clone()).unwrap_or_default();
        metrics.merge_from(&d.metrics);
        let doc = AnalyticsTimeSeries {
          day: d.day,
          timestamp: day_start_utc(d.day),
          platform,
          metrics,
        };
        (id, doc)
      })
      .collect();

    for (id, doc) in staged {
      state.series.insert(id, doc);
    }
    Ok(days.len())
  }

  async fn fetch_time_series(&self, key: &AccountKey, range: DateRange) -> Result<Vec<AnalyticsTimeSeries>, StoreError> {
    let state = self.lock();
    Ok(
      state
        .series
        .range((key.clone(), range.start)..=(key.clone(), range.end))
        .map(|(_, doc)| doc.clone())
        .collect(),
    )
  }

  async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
    let mut state = self.lock();
    match state.posts.iter_mut().find(|p| {
      p.account_id == post.account_id && p.platform == post.platform && p.platform_post_id == post.platform_post_id
    }) {
      Some(existing) => *existing = post.clone(),
      None => state.posts.push(post.clone()),
    }
    Ok(())
  }

  async fn fetch_posts(&self, key: &AccountKey, range: DateRange) -> Result<Vec<Post>, StoreError> {
    let (from, to) = range.instant_bounds();
    let state = self.lock();
    let mut posts: Vec<Post> = state
      .posts
      .iter()
      .filter(|p| p.user_id == key.user_id && p.account_id == key.account_id)
      .filter(|p| p.published_at >= from && p.published_at < to)
      .cloned()
      .collect();
    posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    Ok(posts)
  }
}
