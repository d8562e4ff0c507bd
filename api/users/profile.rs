use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::config::has_database_url;
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::logging;
use omnilytics_rust::models::{ProfileSettings, SignInProfile};
use omnilytics_rust::session::is_internal_caller;
use omnilytics_rust::store::{AnalyticsStore, StoreError};

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

fn bad_request(message: impl Into<String>) -> Result<Response<ResponseBody>, Error> {
  json_response(
    StatusCode::BAD_REQUEST,
    serde_json::json!({"ok": false, "error": "bad_request", "message": message.into()}),
  )
}

fn not_found(uid: &str) -> Result<Response<ResponseBody>, Error> {
  json_response(
    StatusCode::NOT_FOUND,
    serde_json::json!({"ok": false, "error": "not_found", "message": format!("user not found: {uid}")}),
  )
}

fn get_uid(uri: &Uri) -> Option<String> {
  uri
    .query()?
    .split('&')
    .filter_map(|part| part.split_once('='))
    .find(|(k, _)| *k == "uid")
    .map(|(_, v)| v.to_string())
}

#[derive(Deserialize)]
struct SaveSettingsRequest {
  uid: String,
  #[serde(flatten)]
  settings: ProfileSettings,
}

enum ProfileAction {
  Fetch(String),
  SignIn(SignInProfile),
  Save(SaveSettingsRequest),
}

async fn apply<S: AnalyticsStore>(store: &S, action: ProfileAction, now: DateTime<Utc>) -> Result<Response<ResponseBody>, Error> {
  let user = match action {
    ProfileAction::Fetch(uid) => match store.fetch_user(&uid).await.map_err(|e| -> Error { Box::new(e) })? {
      Some(user) => user,
      None => return not_found(&uid),
    },
    ProfileAction::SignIn(profile) => store
      .upsert_user_on_sign_in(&profile, now)
      .await
      .map_err(|e| -> Error { Box::new(e) })?,
    ProfileAction::Save(req) => match store.save_profile_settings(&req.uid, &req.settings).await {
      Ok(user) => user,
      Err(StoreError::NotFound { .. }) => return not_found(&req.uid),
      Err(e) => return Err(Box::new(e) as Error),
    },
  };
  json_response(StatusCode::OK, serde_json::json!({"ok": true, "user": user}))
}

fn parse_action(method: &Method, uri: &Uri, body: &[u8]) -> Result<ProfileAction, String> {
  if method == Method::GET {
    let uid = get_uid(uri).unwrap_or_default();
    if uid.trim().is_empty() {
      return Err("uid is required".to_string());
    }
    return Ok(ProfileAction::Fetch(uid.trim().to_string()));
  }

  if method == Method::POST {
    let profile: SignInProfile = serde_json::from_slice(body).map_err(|e| format!("invalid json body: {e}"))?;
    if profile.uid.trim().is_empty() {
      return Err("uid is required".to_string());
    }
    return Ok(ProfileAction::SignIn(profile));
  }

  let req: SaveSettingsRequest = serde_json::from_slice(body).map_err(|e| format!("invalid json body: {e}"))?;
  if req.uid.trim().is_empty() {
    return Err("uid is required".to_string());
  }
  Ok(ProfileAction::Save(req))
}

async fn handle_profile(
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET && method != Method::POST && method != Method::PUT {
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

  let action = match parse_action(method, uri, &body) {
    Ok(action) => action,
    Err(message) => return bad_request(message),
  };

  if !has_database_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let store = MySqlStore::connect().await?;
  apply(&store, action, Utc::now()).await
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let uri = req.uri().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_profile(&method, &uri, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}
