use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
  AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet, RedirectUrl,
  RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Serialize;
use vercel_runtime::Error;

use crate::config::require_env;
use crate::models::OAuthTokenMaterial;

pub type YoutubeOAuthClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

pub const YOUTUBE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";
pub const YT_ANALYTICS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/yt-analytics.readonly";

#[derive(Clone, Serialize)]
pub struct YoutubeOAuthTokens {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub token_type: String,
  pub scope: Option<String>,
  pub expires_in_seconds: Option<u64>,
}

impl std::fmt::Debug for YoutubeOAuthTokens {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("YoutubeOAuthTokens")
      .field("token_type", &self.token_type)
      .field("scope", &self.scope)
      .field("expires_in_seconds", &self.expires_in_seconds)
      .finish_non_exhaustive()
  }
}

impl YoutubeOAuthTokens {
  pub fn into_material(self, now: DateTime<Utc>) -> OAuthTokenMaterial {
    OAuthTokenMaterial {
      access_token: self.access_token,
      refresh_token: self.refresh_token,
      expires_at: self
        .expires_in_seconds
        .and_then(|s| i64::try_from(s).ok())
        .map(|s| now + Duration::seconds(s)),
    }
  }

  /// Whether the granted scopes include analytics read access. Google omits the
  /// scope field on some responses, which is treated as granted.
  pub fn has_analytics_scope(&self) -> bool {
    self
      .scope
      .as_deref()
      .map(|s| s.split_whitespace().any(|scope| scope == YT_ANALYTICS_READONLY_SCOPE))
      .unwrap_or(true)
  }
}

pub fn youtube_oauth_client_from_config(
  client_id: &str,
  client_secret: &str,
  redirect_uri: &str,
) -> Result<(YoutubeOAuthClient, RedirectUrl), Error> {
  if client_id.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("Missing YOUTUBE_CLIENT_ID")) as Error);
  }
  if client_secret.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("Missing YOUTUBE_CLIENT_SECRET")) as Error);
  }
  if redirect_uri.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("Missing YOUTUBE_REDIRECT_URI")) as Error);
  }

  let auth_url = AuthUrl::new("https://accounts.google.com/o/oauth2/v2/auth".to_string())
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;
  let token_url = TokenUrl::new("https://oauth2.googleapis.com/token".to_string())
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;
  let redirect_url =
    RedirectUrl::new(redirect_uri.to_string()).map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  let client = BasicClient::new(ClientId::new(client_id.to_string()))
    .set_client_secret(ClientSecret::new(client_secret.to_string()))
    .set_auth_uri(auth_url)
    .set_token_uri(token_url)
    .set_redirect_uri(redirect_url.clone());

  Ok((client, redirect_url))
}

pub fn youtube_oauth_client_from_env() -> Result<(YoutubeOAuthClient, RedirectUrl), Error> {
  let client_id = require_env("YOUTUBE_CLIENT_ID").map_err(|e| Box::new(e) as Error)?;
  let client_secret = require_env("YOUTUBE_CLIENT_SECRET").map_err(|e| Box::new(e) as Error)?;
  let redirect_uri = require_env("YOUTUBE_REDIRECT_URI").map_err(|e| Box::new(e) as Error)?;
  youtube_oauth_client_from_config(&client_id, &client_secret, &redirect_uri)
}

/// Read-only channel and analytics access, with a refresh token so stored accounts
/// can be re-ingested later.
pub fn build_authorize_url(client: &YoutubeOAuthClient, state: Option<String>) -> (String, String) {
  let (url, csrf) = client
    .authorize_url(|| state.clone().map(CsrfToken::new).unwrap_or_else(CsrfToken::new_random))
    .add_scope(Scope::new(YOUTUBE_READONLY_SCOPE.to_string()))
    .add_scope(Scope::new(YT_ANALYTICS_READONLY_SCOPE.to_string()))
    .add_extra_param("access_type", "offline")
    .add_extra_param("include_granted_scopes", "true")
    .add_extra_param("prompt", "consent")
    .url();

  (url.to_string(), csrf.secret().to_string())
}

fn http_client() -> Result<oauth2::reqwest::Client, Error> {
  oauth2::reqwest::ClientBuilder::new()
    .redirect(oauth2::reqwest::redirect::Policy::none())
    .build()
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)
}

fn tokens_from_response(token: &BasicTokenResponse) -> YoutubeOAuthTokens {
  YoutubeOAuthTokens {
    access_token: token.access_token().secret().to_string(),
    refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
    token_type: token.token_type().as_ref().to_string(),
    scope: token
      .scopes()
      .map(|scopes| scopes.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ")),
    expires_in_seconds: token.expires_in().map(|d| d.as_secs()),
  }
}

pub async fn exchange_code_for_tokens(client: &YoutubeOAuthClient, code: &str) -> Result<YoutubeOAuthTokens, Error> {
  let http_client = http_client()?;
  let token = client
    .exchange_code(AuthorizationCode::new(code.to_string()))
    .request_async(&http_client)
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  Ok(tokens_from_response(&token))
}

pub async fn refresh_tokens(client: &YoutubeOAuthClient, refresh_token: &str) -> Result<YoutubeOAuthTokens, Error> {
  let http_client = http_client()?;
  let token = client
    .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
    .request_async(&http_client)
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  Ok(tokens_from_response(&token))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn client() -> YoutubeOAuthClient {
    youtube_oauth_client_from_config("id", "secret", "https://example.com/cb").unwrap().0
  }

  #[test]
  fn builds_google_authorize_url_with_read_only_scopes() {
    let (url, state) = build_authorize_url(&client(), Some("state123".to_string()));
    assert!(url.contains("accounts.google.com/o/oauth2/v2/auth"));
    assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fyoutube.readonly"));
    assert!(url.contains("yt-analytics.readonly"));
    assert!(!url.contains("youtube.upload"));
    assert!(!url.contains("yt-analytics-monetary.readonly"));
    assert!(url.contains("access_type=offline"));
    assert!(url.contains("prompt=consent"));
    assert_eq!(state, "state123");
  }

  #[test]
  fn rejects_blank_client_config() {
    let err = youtube_oauth_client_from_config(" ", "secret", "https://example.com/cb")
      .err()
      .map(|e| e.to_string());
    assert_eq!(err.as_deref(), Some("Missing YOUTUBE_CLIENT_ID"));
  }

  #[test]
  fn token_material_expiry_is_relative_to_now() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let tokens = YoutubeOAuthTokens {
      access_token: "ya29.a".to_string(),
      refresh_token: Some("1//r".to_string()),
      token_type: "bearer".to_string(),
      scope: Some(format!("{YOUTUBE_READONLY_SCOPE} {YT_ANALYTICS_READONLY_SCOPE}")),
      expires_in_seconds: Some(3600),
    };
    assert!(tokens.has_analytics_scope());
    let material = tokens.into_material(now);
    assert_eq!(material.expires_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()));
    assert_eq!(material.refresh_token.as_deref(), Some("1//r"));
  }

  #[test]
  fn missing_analytics_scope_is_detected() {
    let tokens = YoutubeOAuthTokens {
      access_token: "ya29.a".to_string(),
      refresh_token: None,
      token_type: "bearer".to_string(),
      scope: Some(YOUTUBE_READONLY_SCOPE.to_string()),
      expires_in_seconds: None,
    };
    assert!(!tokens.has_analytics_scope());
  }
}
