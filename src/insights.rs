use std::time::Duration;

use serde::Serialize;

/// Artificial latency of the canned insights response.
pub const INSIGHTS_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
  Positive,
  Neutral,
  Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
  pub suggestions: Vec<String>,
  pub overall_sentiment: Sentiment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsResponse {
  pub success: bool,
  pub message: String,
  pub insights: Insights,
}

pub fn canned_insights() -> Insights {
  Insights {
    suggestions: vec![
      "Post more videos on Tuesdays for higher engagement.".to_string(),
      "Try using shorter captions for Instagram posts this week.".to_string(),
      "Engage with comments within the first hour of posting.".to_string(),
      "Consider running a poll on Twitter to boost interaction.".to_string(),
    ],
    overall_sentiment: Sentiment::Positive,
  }
}

/// Placeholder until insights are generated from stored analytics.
pub async fn get_ai_insights(delay: Duration) -> InsightsResponse {
  tracing::info!("returning canned ai insights");
  tokio::time::sleep(delay).await;
  InsightsResponse {
    success: true,
    message: "Mock AI insights fetched successfully.".to_string(),
    insights: canned_insights(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn waits_for_the_configured_delay() {
    let started = tokio::time::Instant::now();
    let response = get_ai_insights(INSIGHTS_DELAY).await;
    assert!(started.elapsed() >= INSIGHTS_DELAY);
    assert!(response.success);
    assert_eq!(response.insights.suggestions.len(), 4);
  }

  #[test]
  fn serializes_with_camel_case_fields() {
    let json = serde_json::to_value(InsightsResponse {
      success: true,
      message: "ok".to_string(),
      insights: canned_insights(),
    })
    .unwrap();
    assert_eq!(json["insights"]["overallSentiment"], "positive");
    assert!(json["insights"]["suggestions"].is_array());
  }
}
