// =============================================================================
// LLM digest fetcher — model-recalled recent news, cooled down per ticker
// =============================================================================
//
// Asks the LLM what notable news it knows for each ticker and stores the
// result as ordinary KB entries (source "llm_digest"). Each ticker is
// queried at most once per cooldown window; entries carry no link, so dedup
// falls back to the (ts, ticker, content hash) rule.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::kb::KbEntryDraft;
use crate::news::NewsFetcher;
use crate::providers::llm::extract_json;
use crate::providers::LlmProvider;
use crate::types::{EventType, Importance, Region};

const SYSTEM_PROMPT: &str = "You are a financial news recall assistant. \
Respond with strict JSON only, no prose.";

const MAX_TOKENS: u32 = 900;

pub struct LlmDigestFetcher {
    name: String,
    llm: Arc<dyn LlmProvider>,
    tickers: Vec<String>,
    cooldown: Duration,
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LlmDigestFetcher {
    pub fn new(llm: Arc<dyn LlmProvider>, tickers: Vec<String>, cooldown_hours: u64) -> Self {
        Self {
            name: "llm_digest".into(),
            llm,
            tickers,
            cooldown: Duration::hours(cooldown_hours as i64),
            last_run: Mutex::new(HashMap::new()),
        }
    }

    /// Tickers whose cooldown has lapsed; stamps them as queried.
    fn due_tickers(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut last = self.last_run.lock();
        let due: Vec<String> = self
            .tickers
            .iter()
            .filter(|t| {
                last.get(*t)
                    .map(|prev| now - *prev >= self.cooldown)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        for t in &due {
            last.insert(t.clone(), now);
        }
        due
    }

    fn user_prompt(ticker: &str) -> String {
        format!(
            "List up to 5 notable news items about {ticker} from the last two weeks \
             that you are confident actually happened. Respond with JSON: \
             {{\"items\": [{{\"headline\": \"...\", \"summary\": \"...\", \
             \"importance\": \"HIGH|MEDIUM|LOW\"}}]}}. \
             If you know of none, return {{\"items\": []}}."
        )
    }

    fn parse_items(ticker: &str, now: DateTime<Utc>, raw: &str) -> Vec<KbEntryDraft> {
        let Ok(json_str) = extract_json(raw) else {
            warn!(ticker, "LLM digest output had no JSON — skipped");
            return Vec::new();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&json_str) else {
            return Vec::new();
        };

        value["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let headline = item["headline"].as_str()?.trim();
                        if headline.is_empty() {
                            return None;
                        }
                        let summary = item["summary"].as_str().unwrap_or("").trim();
                        let content = if summary.is_empty() {
                            headline.to_string()
                        } else {
                            format!("{headline}. {summary}")
                        };
                        let importance = item["importance"]
                            .as_str()
                            .map(Importance::parse)
                            .unwrap_or(Importance::Low);

                        Some(KbEntryDraft {
                            ts: now.naive_utc(),
                            ticker: ticker.to_string(),
                            source: "llm_digest".into(),
                            content,
                            event_type: EventType::News,
                            importance,
                            region: Region::Usa,
                            link: None,
                            sentiment_score: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl NewsFetcher for LlmDigestFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<KbEntryDraft>> {
        let now = Utc::now();
        let due = self.due_tickers(now);
        if due.is_empty() {
            debug!("all tickers cooling down — nothing to ask");
            return Ok(Vec::new());
        }

        let mut drafts = Vec::new();
        for ticker in due {
            match self
                .llm
                .generate(SYSTEM_PROMPT, &Self::user_prompt(&ticker), MAX_TOKENS, 0.2)
                .await
            {
                Ok(resp) => drafts.extend(Self::parse_items(&ticker, now, &resp.text)),
                Err(e) => {
                    // One bad ticker must not sink the batch.
                    warn!(ticker = %ticker, error = %e, "LLM digest generation failed");
                }
            }
        }

        debug!(items = drafts.len(), "LLM digest complete");
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeridianError;
    use crate::providers::LlmResponse;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmProvider for CannedLlm {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<LlmResponse> {
            Ok(LlmResponse {
                text: self.0.clone(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }

        fn model_label(&self) -> String {
            "canned".into()
        }
    }

    struct DownLlm;

    #[async_trait]
    impl LlmProvider for DownLlm {
        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _max_tokens: u32,
            _temperature: f64,
        ) -> Result<LlmResponse> {
            Err(MeridianError::Transient("llm down".into()))
        }

        fn model_label(&self) -> String {
            "down".into()
        }
    }

    #[test]
    fn cooldown_gates_repeat_queries() {
        let fetcher = LlmDigestFetcher::new(
            Arc::new(CannedLlm("{\"items\": []}".into())),
            vec!["MSFT".into(), "TER".into()],
            12,
        );
        let t0 = Utc::now();
        assert_eq!(fetcher.due_tickers(t0).len(), 2);
        // Immediately after, everything cools down.
        assert!(fetcher.due_tickers(t0 + Duration::minutes(5)).is_empty());
        // Past the window, due again.
        assert_eq!(fetcher.due_tickers(t0 + Duration::hours(13)).len(), 2);
    }

    #[test]
    fn parse_items_maps_headlines() {
        let raw = r#"```json
{"items": [
  {"headline": "MSFT ships new models", "summary": "Azure rollout.", "importance": "HIGH"},
  {"headline": "", "summary": "dropped"},
  {"headline": "Minor note"}
]}
```"#;
        let now = Utc::now();
        let drafts = LlmDigestFetcher::parse_items("MSFT", now, raw);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].importance, Importance::High);
        assert_eq!(drafts[0].content, "MSFT ships new models. Azure rollout.");
        assert_eq!(drafts[1].importance, Importance::Low);
        assert!(drafts.iter().all(|d| d.link.is_none()));
    }

    #[tokio::test]
    async fn llm_failure_yields_empty_not_error() {
        let fetcher = LlmDigestFetcher::new(Arc::new(DownLlm), vec!["MSFT".into()], 12);
        let out = fetcher.fetch().await.unwrap();
        assert!(out.is_empty());
    }
}
