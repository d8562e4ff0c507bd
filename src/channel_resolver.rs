//! Maps a Google sign-in to the YouTube channel its analytics are read from.
//!
//! When the channel lookup fails or the account owns no channel, the sign-in
//! identity is used instead and the result is tagged
//! [`IdentitySource::SignInFallback`]. Accounts created from a fallback are marked
//! `needs_reauth` by the caller and are not ingested, since the sign-in id is not a
//! channel id.

use crate::providers::youtube_api::{fetch_my_channel_with_base_url, ChannelIdentity};

/// Identity fields returned by the OAuth sign-in provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInIdentity {
  pub provider_user_id: String,
  pub display_name: Option<String>,
  pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
  Channel,
  SignInFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
  pub platform_user_id: String,
  pub username: String,
  pub avatar_url: Option<String>,
  pub source: IdentitySource,
  /// Provider id of the sign-in this identity was resolved from. A fallback
  /// account stores it as its platform user id.
  pub sign_in_user_id: String,
}

impl ResolvedIdentity {
  pub fn is_channel(&self) -> bool {
    self.source == IdentitySource::Channel
  }

  fn from_channel(channel: ChannelIdentity, sign_in: &SignInIdentity) -> Self {
    let username = channel
      .title
      .filter(|t| !t.trim().is_empty())
      .or_else(|| sign_in.display_name.clone())
      .unwrap_or_else(|| channel.channel_id.clone());
    Self {
      platform_user_id: channel.channel_id,
      username,
      avatar_url: channel.avatar_url.or_else(|| sign_in.photo_url.clone()),
      source: IdentitySource::Channel,
      sign_in_user_id: sign_in.provider_user_id.clone(),
    }
  }

  fn fallback(sign_in: &SignInIdentity) -> Self {
    Self {
      platform_user_id: sign_in.provider_user_id.clone(),
      username: sign_in
        .display_name
        .clone()
        .unwrap_or_else(|| "YouTube account".to_string()),
      avatar_url: sign_in.photo_url.clone(),
      source: IdentitySource::SignInFallback,
      sign_in_user_id: sign_in.provider_user_id.clone(),
    }
  }
}

pub async fn resolve_youtube_identity(access_token: &str, data_base_url: &str, sign_in: &SignInIdentity) -> ResolvedIdentity {
  match fetch_my_channel_with_base_url(access_token, data_base_url).await {
    Ok(Some(channel)) => ResolvedIdentity::from_channel(channel, sign_in),
    Ok(None) => {
      tracing::warn!(
        provider_user_id = %sign_in.provider_user_id,
        "google account owns no youtube channel; falling back to sign-in identity"
      );
      ResolvedIdentity::fallback(sign_in)
    }
    Err(e) => {
      tracing::warn!(
        provider_user_id = %sign_in.provider_user_id,
        error = %e,
        "youtube channel lookup failed; falling back to sign-in identity"
      );
      ResolvedIdentity::fallback(sign_in)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::youtube_analytics::test_server::{bind, serve_once};
  use hyper::StatusCode;

  fn sign_in() -> SignInIdentity {
    SignInIdentity {
      provider_user_id: "google-sub-1".to_string(),
      display_name: Some("Ada Lovelace".to_string()),
      photo_url: Some("https://lh3.example/ada.jpg".to_string()),
    }
  }

  #[tokio::test]
  async fn prefers_channel_identity() {
    let (listener, base_url) = bind().await;
    let task = tokio::spawn(serve_once(
      listener,
      StatusCode::OK,
      r#"{"items":[{"id":"UC123","snippet":{"title":"Ada's Channel"}}]}"#,
    ));

    let resolved = resolve_youtube_identity("token123", &base_url, &sign_in()).await;
    assert_eq!(resolved.source, IdentitySource::Channel);
    assert_eq!(resolved.platform_user_id, "UC123");
    assert_eq!(resolved.username, "Ada's Channel");
    assert_eq!(resolved.avatar_url.as_deref(), Some("https://lh3.example/ada.jpg"));
    assert_eq!(resolved.sign_in_user_id, "google-sub-1");
    task.await.unwrap();
  }

  #[tokio::test]
  async fn no_channel_falls_back_and_is_tagged() {
    let (listener, base_url) = bind().await;
    let task = tokio::spawn(serve_once(listener, StatusCode::OK, r#"{"items":[]}"#));

    let resolved = resolve_youtube_identity("token123", &base_url, &sign_in()).await;
    assert_eq!(resolved.source, IdentitySource::SignInFallback);
    assert!(!resolved.is_channel());
    assert_eq!(resolved.platform_user_id, "google-sub-1");
    assert_eq!(resolved.username, "Ada Lovelace");
    task.await.unwrap();
  }

  #[tokio::test]
  async fn lookup_failure_falls_back() {
    let (listener, base_url) = bind().await;
    drop(listener);

    let resolved = resolve_youtube_identity("token123", &base_url, &sign_in()).await;
    assert_eq!(resolved.source, IdentitySource::SignInFallback);
  }
}
