// =============================================================================
// Aggregator fetcher — generic HTTP+JSON news search with a daily quota
// =============================================================================
//
// One instance per (ticker, query). The request budget resets when the
// calendar date rolls; once exhausted, fetch() returns empty rather than
// erroring so the rest of the pipeline is unaffected.
// =============================================================================

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{MeridianError, Result};
use crate::kb::KbEntryDraft;
use crate::news::NewsFetcher;
use crate::providers::quotes::parse_provider_ts;
use crate::types::{EventType, Importance, Region};

const HTTP_TIMEOUT_SECS: u64 = 30;

struct QuotaState {
    date: NaiveDate,
    used: u32,
}

pub struct AggregatorFetcher {
    name: String,
    base_url: String,
    api_key: String,
    ticker: String,
    query: String,
    sources: Vec<String>,
    daily_quota: u32,
    quota: Mutex<QuotaState>,
    client: reqwest::Client,
}

impl AggregatorFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        ticker: impl Into<String>,
        query: impl Into<String>,
        sources: Vec<String>,
        daily_quota: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            ticker: ticker.into(),
            query: query.into(),
            sources,
            daily_quota,
            quota: Mutex::new(QuotaState {
                date: Utc::now().date_naive(),
                used: 0,
            }),
            client,
        }
    }

    /// Take one request from today's budget; false when exhausted.
    fn take_quota(&self, today: NaiveDate) -> bool {
        let mut state = self.quota.lock();
        if state.date != today {
            state.date = today;
            state.used = 0;
        }
        if state.used >= self.daily_quota {
            return false;
        }
        state.used += 1;
        true
    }

    fn article_to_draft(&self, article: &serde_json::Value) -> Option<KbEntryDraft> {
        let title = article["title"].as_str()?.trim();
        if title.is_empty() || title == "[Removed]" {
            return None;
        }

        let description = article["description"].as_str().unwrap_or("").trim();
        let content = if description.is_empty() {
            title.to_string()
        } else {
            format!("{title}. {description}")
        };

        let ts = article["publishedAt"]
            .as_str()
            .and_then(|raw| parse_provider_ts(raw).ok())
            .unwrap_or_else(Utc::now)
            .naive_utc();

        Some(KbEntryDraft {
            ts,
            ticker: self.ticker.clone(),
            source: self.name.clone(),
            content,
            event_type: EventType::News,
            importance: Importance::Medium,
            region: Region::Usa,
            link: article["url"].as_str().map(str::to_string),
            sentiment_score: None,
        })
    }
}

#[async_trait]
impl NewsFetcher for AggregatorFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<KbEntryDraft>> {
        if !self.take_quota(Utc::now().date_naive()) {
            warn!(fetcher = %self.name, quota = self.daily_quota, "daily quota exhausted — skipping");
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v2/everything?q={}&sources={}&sortBy=publishedAt&pageSize=50&apiKey={}",
            self.base_url,
            self.query,
            self.sources.join(","),
            self.api_key
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MeridianError::Permanent(format!("aggregator response not JSON: {e}")))?;

        if !status.is_success() {
            let msg = format!("aggregator returned {status}: {body}");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(MeridianError::Transient(msg))
            } else {
                Err(MeridianError::Permanent(msg))
            };
        }

        let drafts: Vec<KbEntryDraft> = body["articles"]
            .as_array()
            .map(|articles| {
                articles
                    .iter()
                    .filter_map(|a| self.article_to_draft(a))
                    .collect()
            })
            .unwrap_or_default();

        debug!(fetcher = %self.name, articles = drafts.len(), "aggregator fetch complete");
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(quota: u32) -> AggregatorFetcher {
        AggregatorFetcher::new(
            "newsapi/MSFT",
            "https://newsapi.example",
            "key",
            "MSFT",
            "Microsoft",
            vec!["reuters".into(), "bloomberg".into()],
            quota,
        )
    }

    #[test]
    fn quota_enforced_and_resets_on_date_roll() {
        let f = fetcher(2);
        let day1 = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();

        assert!(f.take_quota(day1));
        assert!(f.take_quota(day1));
        assert!(!f.take_quota(day1));
        // New day, fresh budget.
        assert!(f.take_quota(day2));
    }

    #[test]
    fn article_mapping() {
        let f = fetcher(10);
        let article = serde_json::json!({
            "title": "Microsoft beats estimates",
            "description": "Cloud revenue up 22%.",
            "url": "https://r/1",
            "publishedAt": "2025-03-10T12:00:00Z"
        });
        let draft = f.article_to_draft(&article).unwrap();
        assert_eq!(draft.ticker, "MSFT");
        assert_eq!(draft.content, "Microsoft beats estimates. Cloud revenue up 22%.");
        assert_eq!(draft.link.as_deref(), Some("https://r/1"));
    }

    #[test]
    fn removed_articles_are_skipped() {
        let f = fetcher(10);
        let article = serde_json::json!({ "title": "[Removed]" });
        assert!(f.article_to_draft(&article).is_none());
    }
}
