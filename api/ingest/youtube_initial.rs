use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::config::{has_database_url, AppConfig};
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::error::IngestError;
use omnilytics_rust::ingest::{fetch_initial_youtube_stats, IngestOptions, IngestRequest};
use omnilytics_rust::logging;
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

fn error_response(err: &IngestError) -> Result<Response<ResponseBody>, Error> {
  let reportable = err.to_reportable();
  json_response(
    reportable.code.http_status(),
    serde_json::json!({
      "ok": false,
      "success": false,
      "error": reportable.code,
      "message": reportable.message,
      "details": reportable.details,
    }),
  )
}

async fn run_ingest<S: AnalyticsStore>(
  store: &S,
  req: &IngestRequest,
  opts: &IngestOptions,
) -> Result<Response<ResponseBody>, Error> {
  match fetch_initial_youtube_stats(store, req, opts, Utc::now()).await {
    Ok(out) => json_response(
      StatusCode::OK,
      serde_json::to_value(&out).map_err(|e| -> Error { Box::new(e) })?,
    ),
    Err(e) => error_response(&e),
  }
}

async fn handle_ingest(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: IngestRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      )
    }
  };

  if let Err(e) = parsed.validate() {
    return error_response(&e);
  }

  if !has_database_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let config = AppConfig::from_env().map_err(|e| -> Error { Box::new(e) })?;
  let opts = IngestOptions::from_config(&config, Utc::now().date_naive());
  let store = MySqlStore::connect().await?;
  run_ingest(&store, &parsed, &opts).await
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_ingest(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn as hyper_service_fn;
  use hyper_util::rt::TokioIo;
  use omnilytics_rust::ingest::IngestWindow;
  use omnilytics_rust::memory_store::MemoryStore;
  use tokio::net::TcpListener;

  async fn body_json(response: Response<ResponseBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
  }

  fn authorized() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    headers
  }

  async fn serve_one(listener: TcpListener, status: StatusCode, body: &'static str) {
    let (stream, _) = listener.accept().await.unwrap();
    let io = TokioIo::new(stream);
    http1::Builder::new()
      .serve_connection(
        io,
        hyper_service_fn(move |_req: hyper::Request<Incoming>| async move {
          Ok::<_, hyper::Error>(
            hyper::Response::builder()
              .status(status)
              .header("content-type", "application/json")
              .body(Full::new(Bytes::from_static(body.as_bytes())))
              .unwrap(),
          )
        }),
      )
      .await
      .unwrap();
  }

  fn request() -> IngestRequest {
    serde_json::from_value(serde_json::json!({
      "userId": "u1",
      "socialAccountId": "youtube-UC123",
      "accessToken": "token123",
      "youtubeChannelId": "UC123"
    }))
    .unwrap()
  }

  fn options(base_url: String) -> IngestOptions {
    IngestOptions {
      analytics_base_url: base_url,
      data_base_url: None,
      window: IngestWindow::rolling(Utc::now().date_naive(), 90),
      write_chunk_rows: 200,
    }
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let response = handle_ingest(&Method::POST, &HeaderMap::new(), Bytes::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_non_post() {
    let response = handle_ingest(&Method::GET, &HeaderMap::new(), Bytes::new()).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn missing_parameters_are_invalid_argument_even_without_database() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let body = Bytes::from(r#"{"userId":"u1","socialAccountId":"youtube-UC123"}"#);
    let response = handle_ingest(&Method::POST, &authorized(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"], "invalid-argument");
    assert_eq!(
      parsed["message"],
      "Missing required parameters: accessToken, youtubeChannelId."
    );
  }

  #[tokio::test]
  async fn invalid_json_is_bad_request() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let response = handle_ingest(&Method::POST, &authorized(), Bytes::from("{not json"))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn empty_report_returns_success_with_zero_documents() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/", listener.local_addr().unwrap());
    let task = tokio::spawn(serve_one(listener, StatusCode::OK, r#"{"columnHeaders":[{"name":"day"}]}"#));

    let store = MemoryStore::new();
    let response = run_ingest(&store, &request(), &options(base_url)).await.unwrap();
    task.await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = body_json(response).await;
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["documentsWritten"], 0);
  }

  #[tokio::test]
  async fn forbidden_upstream_maps_to_permission_denied() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/", listener.local_addr().unwrap());
    let body = r#"{"error":{"code":403,"message":"Insufficient permission.","errors":[{"reason":"insufficientPermissions"}]}}"#;
    let task = tokio::spawn(serve_one(listener, StatusCode::FORBIDDEN, body));

    let store = MemoryStore::new();
    let response = run_ingest(&store, &request(), &options(base_url)).await.unwrap();
    task.await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let parsed = body_json(response).await;
    assert_eq!(parsed["error"], "permission-denied");
    assert!(parsed["message"].as_str().unwrap().contains("yt-analytics.readonly"));
  }
}
