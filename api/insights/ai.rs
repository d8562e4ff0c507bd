use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use omnilytics_rust::insights::{get_ai_insights, INSIGHTS_DELAY};
use omnilytics_rust::logging;
use omnilytics_rust::session::is_internal_caller;

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

async fn handle_insights(
  method: &Method,
  headers: &HeaderMap,
  _body: Bytes,
  delay: std::time::Duration,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST && method != Method::GET {
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

  let response = get_ai_insights(delay).await;
  json_response(
    StatusCode::OK,
    serde_json::to_value(&response).map_err(|e| -> Error { Box::new(e) })?,
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_insights(&method, &headers, bytes, INSIGHTS_DELAY).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn returns_canned_insights() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer secret".parse().unwrap());
    let response = handle_insights(&Method::POST, &headers, Bytes::new(), Duration::ZERO)
      .await
      .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed.get("success").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(parsed["insights"]["overallSentiment"], "positive");
    assert_eq!(parsed["insights"]["suggestions"].as_array().map(|a| a.len()), Some(4));
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let response = handle_insights(&Method::POST, &HeaderMap::new(), Bytes::new(), Duration::ZERO)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }
}
