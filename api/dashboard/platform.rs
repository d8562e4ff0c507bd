use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::aggregate::{load_platform_dashboard, DashboardQuery, PostMetric, DEFAULT_TOP_POSTS};
use omnilytics_rust::config::has_database_url;
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::logging;
use omnilytics_rust::models::SocialPlatform;
use omnilytics_rust::session::is_internal_caller;
use omnilytics_rust::store::{AnalyticsStore, DateRange};

const DEFAULT_RANGE_DAYS: i64 = 28;
const MAX_TOP_POSTS: usize = 50;

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

/// Empty values count as absent.
fn get_query_param(uri: &Uri, key: &str) -> Option<String> {
  let query = uri.query()?;
  for part in query.split('&') {
    let mut it = part.splitn(2, '=');
    if it.next().unwrap_or("") != key {
      continue;
    }
    let raw = it.next().unwrap_or("");
    let v = percent_decode(raw).unwrap_or_else(|| raw.to_string());
    let v = v.trim();
    return if v.is_empty() { None } else { Some(v.to_string()) };
  }
  None
}

fn parse_date(uri: &Uri, key: &str) -> Result<Option<NaiveDate>, String> {
  match get_query_param(uri, key) {
    None => Ok(None),
    Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
      .map(Some)
      .map_err(|_| format!("{key} must be YYYY-MM-DD")),
  }
}

/// Without `start`/`end` the range is the 28 days ending yesterday.
fn parse_query(uri: &Uri, today: NaiveDate) -> Result<(String, DashboardQuery), String> {
  let user_id = get_query_param(uri, "userId").ok_or("userId is required")?;
  let platform_raw = get_query_param(uri, "platform").ok_or("platform is required")?;
  let platform = SocialPlatform::parse(&platform_raw).ok_or_else(|| format!("unknown platform: {platform_raw}"))?;

  let end = parse_date(uri, "end")?.unwrap_or(today - chrono::Duration::days(1));
  let range = match parse_date(uri, "start")? {
    Some(start) => DateRange::new(start, end).ok_or("start must not be after end")?,
    None => DateRange::ending_on(end, DEFAULT_RANGE_DAYS),
  };

  let post_metric = match get_query_param(uri, "metric") {
    Some(raw) => PostMetric::parse(&raw).ok_or_else(|| format!("unknown metric: {raw}"))?,
    None => PostMetric::default_for(platform),
  };
  let top_n = match get_query_param(uri, "limit") {
    Some(raw) => raw
      .parse::<usize>()
      .map_err(|_| "limit must be a positive integer".to_string())?
      .clamp(1, MAX_TOP_POSTS),
    None => DEFAULT_TOP_POSTS,
  };

  Ok((
    user_id,
    DashboardQuery {
      platform,
      range,
      account_id: get_query_param(uri, "accountId"),
      post_metric,
      top_n,
    },
  ))
}

async fn render<S: AnalyticsStore>(store: &S, uid: &str, query: &DashboardQuery) -> Result<Response<ResponseBody>, Error> {
  let view = load_platform_dashboard(store, uid, query).await;
  json_response(
    StatusCode::OK,
    serde_json::to_value(&view).map_err(|e| -> Error { Box::new(e) })?,
  )
}

async fn handle_dashboard(
  method: &Method,
  uri: &Uri,
  headers: &HeaderMap,
  _body: Bytes,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET {
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

  let (user_id, query) = match parse_query(uri, Utc::now().date_naive()) {
    Ok(parsed) => parsed,
    Err(message) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": message}),
      )
    }
  };

  if !has_database_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let store = MySqlStore::connect().await?;
  render(&store, &user_id, &query).await
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let uri = req.uri().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_dashboard(&method, &uri, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use omnilytics_rust::memory_store::MemoryStore;
  use omnilytics_rust::models::SignInProfile;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
  }

  fn parse(uri: &str) -> Result<(String, DashboardQuery), String> {
    let uri: Uri = uri.parse().unwrap();
    parse_query(&uri, today())
  }

  async fn body_json(response: Response<ResponseBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[test]
  fn defaults_to_last_28_days_ending_yesterday() {
    let (uid, query) = parse("/api/dashboard/platform?userId=u1&platform=youtube").unwrap();
    assert_eq!(uid, "u1");
    assert_eq!(query.platform, SocialPlatform::Youtube);
    assert_eq!(query.range.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    assert_eq!(query.range.days(), 28);
    assert_eq!(query.post_metric, PostMetric::Views);
    assert_eq!(query.top_n, DEFAULT_TOP_POSTS);
  }

  #[test]
  fn rejects_bad_parameters() {
    assert!(parse("/api/dashboard/platform?platform=youtube").is_err());
    assert!(parse("/api/dashboard/platform?userId=u1&platform=myspace").is_err());
    assert!(parse("/api/dashboard/platform?userId=u1&platform=youtube&start=2024-02-10&end=2024-02-01").is_err());
    assert!(parse("/api/dashboard/platform?userId=u1&platform=youtube&metric=hearts").is_err());
  }

  #[test]
  fn decodes_percent_encoded_parameters() {
    let (uid, query) =
      parse("/api/dashboard/platform?userId=user%201&platform=youtube&accountId=youtube-UC%2Dabc&end=2024%2D02%2D10")
        .unwrap();
    assert_eq!(uid, "user 1");
    assert_eq!(query.account_id.as_deref(), Some("youtube-UC-abc"));
    assert_eq!(query.range.end, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());

    assert!(parse("/api/dashboard/platform?userId=%20&platform=youtube").is_err());
  }

  #[test]
  fn clamps_limit() {
    let (_, query) = parse("/api/dashboard/platform?userId=u1&platform=instagram&limit=500").unwrap();
    assert_eq!(query.top_n, MAX_TOP_POSTS);
    assert_eq!(query.post_metric, PostMetric::Likes);
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let uri: Uri = "/api/dashboard/platform?userId=u1&platform=youtube".parse().unwrap();
    let response = handle_dashboard(&Method::GET, &uri, &HeaderMap::new(), Bytes::new())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn free_user_sees_upgrade_prompt_for_premium_platform() {
    let store = MemoryStore::new();
    store
      .upsert_user_on_sign_in(
        &SignInProfile {
          uid: "u1".to_string(),
          email: None,
          display_name: None,
          photo_url: None,
          providers: vec![],
        },
        Utc::now(),
      )
      .await
      .unwrap();

    let (uid, query) = parse("/api/dashboard/platform?userId=u1&platform=linkedin").unwrap();
    let parsed = body_json(render(&store, &uid, &query).await.unwrap()).await;
    assert_eq!(parsed["state"], "upgrade_required");

    let (uid, query) = parse("/api/dashboard/platform?userId=u1&platform=youtube").unwrap();
    let parsed = body_json(render(&store, &uid, &query).await.unwrap()).await;
    assert_eq!(parsed["state"], "connect_prompt");
  }
}
