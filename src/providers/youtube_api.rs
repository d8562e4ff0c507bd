use vercel_runtime::Error;

use crate::config::DEFAULT_DATA_BASE_URL;

/// Content-owner identity behind a Google sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
  pub channel_id: String,
  pub title: Option<String>,
  pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatistics {
  pub subscriber_count: Option<u64>,
  pub view_count: Option<u64>,
  pub video_count: Option<u64>,
}

type Hub = google_youtube3::YouTube<
  hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
>;

fn hub(access_token: &str, base_url: &str) -> Result<Hub, Error> {
  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?
    .https_or_http()
    .enable_http1()
    .build();

  let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let mut hub = google_youtube3::YouTube::new(client, access_token.to_string());
  hub.base_url(base_url.to_string());
  hub.root_url(base_url.to_string());
  Ok(hub)
}

/// `Ok(None)` when the token is valid but the Google account owns no channel.
pub async fn fetch_my_channel_with_base_url(access_token: &str, base_url: &str) -> Result<Option<ChannelIdentity>, Error> {
  let hub = hub(access_token, base_url)?;

  let (_, response) = hub
    .channels()
    .list(&vec!["id".into(), "snippet".into()])
    .mine(true)
    .doit()
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  let channel = response.items.unwrap_or_default().into_iter().find_map(|c| {
    let channel_id = c.id?;
    let snippet = c.snippet;
    let title = snippet.as_ref().and_then(|s| s.title.clone());
    let avatar_url = snippet
      .and_then(|s| s.thumbnails)
      .and_then(|t| t.high.or(t.medium).or(t.default))
      .and_then(|th| th.url);
    Some(ChannelIdentity {
      channel_id,
      title,
      avatar_url,
    })
  });

  Ok(channel)
}

pub async fn fetch_my_channel(access_token: &str) -> Result<Option<ChannelIdentity>, Error> {
  fetch_my_channel_with_base_url(access_token, DEFAULT_DATA_BASE_URL).await
}

/// Current lifetime totals for one channel. Subscriber count is `None` when the
/// channel hides it.
pub async fn fetch_channel_statistics_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
) -> Result<Option<ChannelStatistics>, Error> {
  let hub = hub(access_token, base_url)?;

  let (_, response) = hub
    .channels()
    .list(&vec!["statistics".into()])
    .add_id(channel_id)
    .doit()
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  let stats = response
    .items
    .unwrap_or_default()
    .into_iter()
    .find_map(|c| c.statistics)
    .map(|s| ChannelStatistics {
      subscriber_count: if s.hidden_subscriber_count.unwrap_or(false) {
        None
      } else {
        s.subscriber_count
      },
      view_count: s.view_count,
      video_count: s.video_count,
    });

  Ok(stats)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::youtube_analytics::test_server::{bind, serve_once};
  use hyper::StatusCode;

  #[tokio::test]
  async fn fetches_channel_identity_via_sdk_against_mock_server() {
    let (listener, base_url) = bind().await;
    let body = r#"{
      "kind":"youtube#channelListResponse",
      "items":[{
        "id":"UC123",
        "snippet":{
          "title":"Cooking With Ada",
          "thumbnails":{
            "default":{"url":"https://yt3.example/default.jpg"},
            "high":{"url":"https://yt3.example/high.jpg"}
          }
        }
      }]
    }"#;
    let task = tokio::spawn(serve_once(listener, StatusCode::OK, body));

    let channel = fetch_my_channel_with_base_url("token123", &base_url).await.unwrap().unwrap();
    assert_eq!(channel.channel_id, "UC123");
    assert_eq!(channel.title.as_deref(), Some("Cooking With Ada"));
    assert_eq!(channel.avatar_url.as_deref(), Some("https://yt3.example/high.jpg"));

    let uri = task.await.unwrap();
    assert!(uri.contains("mine=true"));
  }

  #[tokio::test]
  async fn account_without_channel_yields_none() {
    let (listener, base_url) = bind().await;
    let task = tokio::spawn(serve_once(
      listener,
      StatusCode::OK,
      r#"{"kind":"youtube#channelListResponse","pageInfo":{"totalResults":0}}"#,
    ));

    let channel = fetch_my_channel_with_base_url("token123", &base_url).await.unwrap();
    assert!(channel.is_none());
    task.await.unwrap();
  }

  #[tokio::test]
  async fn fetches_statistics_for_channel_id() {
    let (listener, base_url) = bind().await;
    let body = r#"{"items":[{"id":"UC123","statistics":{"subscriberCount":"1200","viewCount":"50000","videoCount":"42","hiddenSubscriberCount":false}}]}"#;
    let task = tokio::spawn(serve_once(listener, StatusCode::OK, body));

    let stats = fetch_channel_statistics_with_base_url("token123", &base_url, "UC123")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stats.subscriber_count, Some(1200));
    assert_eq!(stats.view_count, Some(50000));

    let uri = task.await.unwrap();
    assert!(uri.contains("id=UC123"));
  }

  #[tokio::test]
  async fn hidden_subscriber_count_is_not_reported() {
    let (listener, base_url) = bind().await;
    let body = r#"{"items":[{"id":"UC123","statistics":{"subscriberCount":"1000","hiddenSubscriberCount":true}}]}"#;
    let task = tokio::spawn(serve_once(listener, StatusCode::OK, body));

    let stats = fetch_channel_statistics_with_base_url("token123", &base_url, "UC123")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stats.subscriber_count, None);
    task.await.unwrap();
  }
}
