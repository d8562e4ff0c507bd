use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::accounts::{connect_account, AccountError, NewConnection};
use omnilytics_rust::channel_resolver::{resolve_youtube_identity, SignInIdentity};
use omnilytics_rust::config::{has_database_url, AppConfig};
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::ingest::{fetch_initial_youtube_stats, IngestOptions, IngestRequest};
use omnilytics_rust::logging;
use omnilytics_rust::models::{ConnectionStatus, SocialPlatform};
use omnilytics_rust::providers::youtube::{exchange_code_for_tokens, youtube_oauth_client_from_env, YoutubeOAuthTokens};
use omnilytics_rust::session::is_internal_caller;
use omnilytics_rust::store::AnalyticsStore;

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest {
  user_id: String,
  code: String,
  /// Google account id from the sign-in, used when the channel lookup fails.
  #[serde(default)]
  provider_user_id: Option<String>,
  #[serde(default)]
  display_name: Option<String>,
  #[serde(default)]
  photo_url: Option<String>,
}

impl ExchangeRequest {
  fn sign_in(&self) -> SignInIdentity {
    SignInIdentity {
      provider_user_id: self
        .provider_user_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| self.user_id.clone()),
      display_name: self.display_name.clone(),
      photo_url: self.photo_url.clone(),
    }
  }
}

/// Resolves the channel, stores the account and runs the first ingestion. An
/// ingestion failure is reported next to the connected account instead of failing
/// the whole connect.
async fn connect_and_ingest<S: AnalyticsStore>(
  store: &S,
  user_id: &str,
  sign_in: &SignInIdentity,
  tokens: YoutubeOAuthTokens,
  data_base_url: &str,
  opts: &IngestOptions,
  now: DateTime<Utc>,
) -> Result<Response<ResponseBody>, Error> {
  if !tokens.has_analytics_scope() {
    tracing::warn!(user_id = %user_id, "analytics scope was not granted");
  }

  let access_token = tokens.access_token.clone();
  let identity = resolve_youtube_identity(&access_token, data_base_url, sign_in).await;
  let conn = NewConnection {
    platform: SocialPlatform::Youtube,
    identity,
    tokens: tokens.into_material(now),
  };

  let account = match connect_account(store, user_id, conn, now).await {
    Ok(account) => account,
    Err(AccountError::Denied(denied)) => {
      return json_response(
        StatusCode::FORBIDDEN,
        serde_json::json!({"ok": false, "error": denied.code(), "message": denied.to_string()}),
      )
    }
    Err(AccountError::UserNotFound(uid)) => {
      return json_response(
        StatusCode::NOT_FOUND,
        serde_json::json!({"ok": false, "error": "user_not_found", "message": format!("user not found: {uid}")}),
      )
    }
    Err(e) => return Err(Box::new(e) as Error),
  };

  if account.status != ConnectionStatus::Connected {
    return json_response(
      StatusCode::OK,
      serde_json::json!({"ok": true, "account": account, "ingest": null}),
    );
  }

  let req = IngestRequest {
    user_id: account.user_id.clone(),
    social_account_id: account.id.clone(),
    access_token,
    youtube_channel_id: account.platform_user_id.clone(),
  };
  let ingest = match fetch_initial_youtube_stats(store, &req, opts, now).await {
    Ok(out) => serde_json::to_value(&out).map_err(|e| -> Error { Box::new(e) })?,
    Err(e) => {
      tracing::warn!(account_id = %account.id, error = %e, "initial ingestion failed after connect");
      let reportable = e.to_reportable();
      serde_json::json!({
        "success": false,
        "error": reportable.code,
        "message": reportable.message,
        "details": reportable.details,
      })
    }
  };

  json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "account": account, "ingest": ingest}),
  )
}

async fn handle_exchange(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  if !is_internal_caller(headers) {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let parsed: ExchangeRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      )
    }
  };

  if parsed.user_id.trim().is_empty() || parsed.code.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "userId and code are required"}),
    );
  }

  if !has_database_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let config = AppConfig::from_env().map_err(|e| -> Error { Box::new(e) })?;
  let (client, _redirect) = youtube_oauth_client_from_env()?;
  let tokens = exchange_code_for_tokens(&client, &parsed.code).await?;

  let store = MySqlStore::connect().await?;
  let now = Utc::now();
  let opts = IngestOptions::from_config(&config, now.date_naive());
  connect_and_ingest(
    &store,
    parsed.user_id.trim(),
    &parsed.sign_in(),
    tokens,
    &config.data_base_url,
    &opts,
    now,
  )
  .await
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_exchange(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}
