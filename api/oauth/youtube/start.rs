use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::logging;
use omnilytics_rust::providers::youtube::{build_authorize_url, youtube_oauth_client_from_env};
use omnilytics_rust::session::is_internal_caller;

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
struct StartRequest {
  user_id: String,
  #[serde(default)]
  state: Option<String>,
}

async fn handle_start(method: &Method, headers: &HeaderMap, body: Bytes) -> Result<Response<ResponseBody>, Error> {
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

  let parsed: StartRequest = match serde_json::from_slice(&body) {
    Ok(parsed) => parsed,
    Err(e) => {
      return json_response(
        StatusCode::BAD_REQUEST,
        serde_json::json!({"ok": false, "error": "bad_request", "message": format!("invalid json body: {e}")}),
      )
    }
  };

  if parsed.user_id.trim().is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "userId is required"}),
    );
  }

  let (client, _redirect) = youtube_oauth_client_from_env()?;
  let state = parsed.state.filter(|s| !s.is_empty());
  let (authorize_url, state) = build_authorize_url(&client, state);
  tracing::info!(user_id = %parsed.user_id, "youtube oauth started");

  json_response(
    StatusCode::OK,
    serde_json::json!({"ok": true, "authorize_url": authorize_url, "state": state}),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_start(&method, &headers, bytes).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}
