// =============================================================================
// Sentiment-feed fetcher — provider items arriving with a score attached
// =============================================================================
//
// The upstream scores in [0,1]; anything outside is clamped on the way in so
// the knowledge-base invariant holds regardless of provider quirks.
// =============================================================================

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tracing::debug;

use crate::error::{MeridianError, Result};
use crate::kb::KbEntryDraft;
use crate::news::NewsFetcher;
use crate::types::{EventType, Importance, Region};

const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct SentimentFeedFetcher {
    name: String,
    base_url: String,
    api_key: String,
    tickers: Vec<String>,
    client: reqwest::Client,
}

impl SentimentFeedFetcher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        tickers: Vec<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: "sentiment_feed".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            tickers,
            client,
        }
    }

    fn item_to_draft(&self, ticker: &str, item: &serde_json::Value) -> Option<KbEntryDraft> {
        let title = item["title"].as_str()?.trim();
        if title.is_empty() {
            return None;
        }

        let summary = item["summary"].as_str().unwrap_or("").trim();
        let content = if summary.is_empty() {
            title.to_string()
        } else {
            format!("{title}. {summary}")
        };

        // Feed format: 20250310T143000
        let ts = item["time_published"]
            .as_str()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok())
            .unwrap_or_else(|| Utc::now().naive_utc());

        let score = item["overall_sentiment_score"]
            .as_f64()
            .map(|s| s.clamp(0.0, 1.0));

        Some(KbEntryDraft {
            ts,
            ticker: ticker.to_string(),
            source: self.name.clone(),
            content,
            event_type: EventType::News,
            importance: Importance::Medium,
            region: Region::Usa,
            link: item["url"].as_str().map(str::to_string),
            sentiment_score: score,
        })
    }
}

#[async_trait]
impl NewsFetcher for SentimentFeedFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<KbEntryDraft>> {
        let mut drafts = Vec::new();

        for ticker in &self.tickers {
            let url = format!(
                "{}/query?function=NEWS_SENTIMENT&tickers={}&apikey={}",
                self.base_url, ticker, self.api_key
            );

            let resp = self.client.get(&url).send().await?;
            let status = resp.status();
            let body: serde_json::Value = resp.json().await.map_err(|e| {
                MeridianError::Permanent(format!("sentiment feed response not JSON: {e}"))
            })?;

            if !status.is_success() {
                let msg = format!("sentiment feed returned {status}: {body}");
                return if status.is_server_error() || status.as_u16() == 429 {
                    Err(MeridianError::Transient(msg))
                } else {
                    Err(MeridianError::Permanent(msg))
                };
            }

            if let Some(feed) = body["feed"].as_array() {
                drafts.extend(feed.iter().filter_map(|item| self.item_to_draft(ticker, item)));
            }
        }

        debug!(items = drafts.len(), "sentiment feed fetch complete");
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> SentimentFeedFetcher {
        SentimentFeedFetcher::new("https://feed.example", "key", vec!["MSFT".into()])
    }

    #[test]
    fn scored_item_maps_with_clamped_sentiment() {
        let item = serde_json::json!({
            "title": "Analysts raise targets",
            "summary": "Broad upgrades.",
            "url": "https://f/1",
            "time_published": "20250310T143000",
            "overall_sentiment_score": 1.7
        });
        let draft = fetcher().item_to_draft("MSFT", &item).unwrap();
        assert_eq!(draft.sentiment_score, Some(1.0));
        assert_eq!(draft.ts.format("%Y-%m-%d %H:%M").to_string(), "2025-03-10 14:30");
    }

    #[test]
    fn unscored_item_keeps_null_sentiment() {
        let item = serde_json::json!({ "title": "No score here" });
        let draft = fetcher().item_to_draft("MSFT", &item).unwrap();
        assert_eq!(draft.sentiment_score, None);
    }
}
