use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::accounts::{disconnect_account, AccountError};
use omnilytics_rust::config::has_database_url;
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::logging;
use omnilytics_rust::session::is_internal_caller;
use omnilytics_rust::store::{AccountKey, AnalyticsStore};

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

fn decode_hex_digit(b: u8) -> Option<u8> {
  match b {
    b'0'..=b'9' => Some(b - b'0'),
    b'a'..=b'f' => Some(b - b'a' + 10),
    b'A'..=b'F' => Some(b - b'A' + 10),
    _ => None,
  }
}

fn percent_decode(input: &str) -> Option<String> {
  let bytes = input.as_bytes();
  let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'%' if i + 2 < bytes.len() => {
        let hi = decode_hex_digit(bytes[i + 1])?;
        let lo = decode_hex_digit(bytes[i + 2])?;
        out.push((hi << 4) | lo);
        i += 3;
      }
      b'+' => {
        out.push(b' ');
        i += 1;
      }
      b => {
        out.push(b);
        i += 1;
      }
    }
  }
  String::from_utf8(out).ok()
}

fn get_query_param(uri: &Uri, key: &str) -> Option<String> {
  let query = uri.query()?;
  for part in query.split('&') {
    let mut it = part.splitn(2, '=');
    let k = it.next().unwrap_or("");
    if k != key {
      continue;
    }
    let v = it.next().unwrap_or("");
    return percent_decode(v).or_else(|| Some(v.to_string()));
  }
  None
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectRequest {
  user_id: String,
  account_id: String,
}

async fn list_accounts<S: AnalyticsStore>(store: &S, uid: &str) -> Result<Response<ResponseBody>, Error> {
  let accounts = store
    .list_social_accounts(uid)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "accounts": accounts}),
  )
}

async fn remove_account<S: AnalyticsStore>(store: &S, key: &AccountKey) -> Result<Response<ResponseBody>, Error> {
  match disconnect_account(store, key).await {
    Ok(()) => json_response(
      StatusCode::OK,
      serde_json::json!({"ok": true, "accountId": key.account_id}),
    ),
    Err(AccountError::AccountNotFound(id)) => json_response(
      StatusCode::NOT_FOUND,
      serde_json::json!({"ok": false, "error": "not_found", "message": format!("social account not found: {id}")}),
    ),
    Err(e) => Err(Box::new(e) as Error),
  }
}

async fn handle_accounts(
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET && method != Method::DELETE {
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

  if method == Method::GET {
    let user_id = get_query_param(uri, "userId").unwrap_or_default();
    if user_id.trim().is_empty() {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": "userId is required"}),
      );
    }
    if !has_database_url() {
      return not_configured();
    }
    let store = MySqlStore::connect().await?;
    return list_accounts(&store, user_id.trim()).await;
  }

  let parsed: DisconnectRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      )
    }
  };
  if parsed.user_id.trim().is_empty() || parsed.account_id.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "userId and accountId are required"}),
    );
  }
  if !has_database_url() {
    return not_configured();
  }

  let store = MySqlStore::connect().await?;
  remove_account(&store, &AccountKey::new(parsed.user_id.trim(), parsed.account_id.trim())).await
}

fn not_configured() -> Result<Response<ResponseBody>, Error> {
  json_response(
    StatusCode::NOT_IMPLEMENTED,
    serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let uri = req.uri().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_accounts(&method, &uri, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}
