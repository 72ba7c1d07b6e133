// =============================================================================
// RSS fetcher — central-bank statement / speech / minutes feeds
// =============================================================================
//
// Each configured feed maps to one event type, region, and sentinel ticker
// (central-bank output is macro by definition). Items become KB drafts with
// title + summary as content and the item link for dedup.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{MeridianError, Result};
use crate::kb::KbEntryDraft;
use crate::news::NewsFetcher;
use crate::types::{EventType, Importance, Region};

const HTTP_TIMEOUT_SECS: u64 = 30;

/// One RSS feed with its classification.
pub struct RssFetcher {
    name: String,
    feed_url: String,
    ticker: String,
    event_type: EventType,
    importance: Importance,
    region: Region,
    client: reqwest::Client,
}

impl RssFetcher {
    pub fn new(
        name: impl Into<String>,
        feed_url: impl Into<String>,
        ticker: impl Into<String>,
        event_type: EventType,
        importance: Importance,
        region: Region,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: name.into(),
            feed_url: feed_url.into(),
            ticker: ticker.into(),
            event_type,
            importance,
            region,
            client,
        }
    }

    /// The standard central-bank feed set.
    pub fn central_bank_feeds() -> Vec<RssFetcher> {
        vec![
            RssFetcher::new(
                "fed_press",
                "https://www.federalreserve.gov/feeds/press_monetary.xml",
                "US_MACRO",
                EventType::FomcStatement,
                Importance::High,
                Region::Usa,
            ),
            RssFetcher::new(
                "fed_speeches",
                "https://www.federalreserve.gov/feeds/speeches.xml",
                "US_MACRO",
                EventType::FomcSpeech,
                Importance::Medium,
                Region::Usa,
            ),
            RssFetcher::new(
                "boe_news",
                "https://www.bankofengland.co.uk/rss/news",
                "MACRO",
                EventType::BoeStatement,
                Importance::High,
                Region::Uk,
            ),
            RssFetcher::new(
                "ecb_press",
                "https://www.ecb.europa.eu/rss/press.html",
                "MACRO",
                EventType::EcbStatement,
                Importance::High,
                Region::Eu,
            ),
            RssFetcher::new(
                "boj_releases",
                "https://www.boj.or.jp/en/rss/release_2025.xml",
                "MACRO",
                EventType::BojStatement,
                Importance::High,
                Region::Japan,
            ),
        ]
    }

    fn item_to_draft(&self, item: &rss::Item) -> Option<KbEntryDraft> {
        let title = item.title()?.trim();
        if title.is_empty() {
            return None;
        }

        let summary = item
            .description()
            .map(|d| strip_tags(d))
            .unwrap_or_default();
        let content = if summary.is_empty() {
            title.to_string()
        } else {
            format!("{title}. {summary}")
        };

        let ts = item
            .pub_date()
            .and_then(parse_pub_date)
            .unwrap_or_else(Utc::now)
            .naive_utc();

        Some(KbEntryDraft {
            ts,
            ticker: self.ticker.clone(),
            source: self.name.clone(),
            content,
            event_type: self.event_type,
            importance: self.importance,
            region: self.region,
            link: item.link().map(str::to_string),
            sentiment_score: None,
        })
    }
}

#[async_trait]
impl NewsFetcher for RssFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<KbEntryDraft>> {
        let bytes = self
            .client
            .get(&self.feed_url)
            .send()
            .await?
            .error_for_status()
            .map_err(MeridianError::from)?
            .bytes()
            .await?;

        let channel = rss::Channel::read_from(&bytes[..])
            .map_err(|e| MeridianError::Permanent(format!("{}: bad feed XML: {e}", self.name)))?;

        let drafts: Vec<KbEntryDraft> = channel
            .items()
            .iter()
            .filter_map(|item| self.item_to_draft(item))
            .collect();

        debug!(feed = %self.name, items = drafts.len(), "RSS feed parsed");
        Ok(drafts)
    }
}

fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

/// Drop HTML tags from feed descriptions; summaries are stored as plain text.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pub_date_formats() {
        assert!(parse_pub_date("Mon, 10 Mar 2025 14:30:00 GMT").is_some());
        assert!(parse_pub_date("2025-03-10T14:30:00Z").is_some());
        assert!(parse_pub_date("tomorrow-ish").is_none());
    }

    #[test]
    fn strip_tags_flattens_markup() {
        let html = "<p>The Committee <b>decided</b> to maintain the target range.</p>";
        assert_eq!(
            strip_tags(html),
            "The Committee decided to maintain the target range."
        );
    }

    #[test]
    fn item_mapping_builds_macro_draft() {
        let fetcher = &RssFetcher::central_bank_feeds()[0];

        let mut item = rss::Item::default();
        item.set_title("FOMC statement".to_string());
        item.set_description("<p>Rates unchanged.</p>".to_string());
        item.set_link("https://www.federalreserve.gov/x".to_string());
        item.set_pub_date("Mon, 10 Mar 2025 18:00:00 GMT".to_string());

        let draft = fetcher.item_to_draft(&item).unwrap();
        assert_eq!(draft.ticker, "US_MACRO");
        assert_eq!(draft.event_type, EventType::FomcStatement);
        assert_eq!(draft.content, "FOMC statement. Rates unchanged.");
        assert_eq!(draft.link.as_deref(), Some("https://www.federalreserve.gov/x"));
    }

    #[test]
    fn empty_title_is_skipped() {
        let fetcher = &RssFetcher::central_bank_feeds()[0];
        let item = rss::Item::default();
        assert!(fetcher.item_to_draft(&item).is_none());
    }
}
