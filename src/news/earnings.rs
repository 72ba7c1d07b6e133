// =============================================================================
// Earnings-calendar fetcher — CSV provider, one EARNINGS entry per row
// =============================================================================
//
// Expected columns: symbol, name, reportDate, fiscalDateEnding, estimate,
// currency. Rows for tickers outside the watch list are dropped; rows with
// an unparseable date are skipped, not fatal.
// =============================================================================

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::{MeridianError, Result};
use crate::kb::KbEntryDraft;
use crate::news::NewsFetcher;
use crate::types::{EventType, Importance, Region};

const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct EarningsCalendarFetcher {
    name: String,
    url: String,
    watchlist: HashSet<String>,
    client: reqwest::Client,
}

impl EarningsCalendarFetcher {
    pub fn new(url: impl Into<String>, watchlist: &[String]) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            name: "earnings_calendar".into(),
            url: url.into(),
            watchlist: watchlist.iter().map(|t| t.to_uppercase()).collect(),
            client,
        }
    }

    /// Map calendar CSV text into drafts. Exposed for tests.
    fn parse_csv(&self, text: &str) -> Vec<KbEntryDraft> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(e) => {
                warn!(error = %e, "earnings CSV has no headers");
                return Vec::new();
            }
        };
        let idx = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let (Some(sym_i), Some(date_i)) = (idx("symbol"), idx("reportDate")) else {
            warn!("earnings CSV missing symbol/reportDate columns");
            return Vec::new();
        };
        let name_i = idx("name");
        let estimate_i = idx("estimate");

        let mut drafts = Vec::new();
        for record in reader.records().flatten() {
            let Some(symbol) = record.get(sym_i).map(|s| s.trim().to_uppercase()) else {
                continue;
            };
            if symbol.is_empty() || !self.watchlist.contains(&symbol) {
                continue;
            }
            let Some(date) = record
                .get(date_i)
                .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
            else {
                continue;
            };

            let company = name_i
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(&symbol)
                .to_string();
            let estimate = estimate_i
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty());

            let content = match estimate {
                Some(eps) => format!(
                    "{company} ({symbol}) reports earnings on {date}. Consensus EPS estimate {eps}."
                ),
                None => format!("{company} ({symbol}) reports earnings on {date}."),
            };

            drafts.push(KbEntryDraft {
                ts: date.and_hms_opt(0, 0, 0).unwrap_or_default(),
                ticker: symbol,
                source: self.name.clone(),
                content,
                event_type: EventType::Earnings,
                importance: Importance::High,
                region: Region::Usa,
                link: None,
                sentiment_score: None,
            });
        }
        drafts
    }
}

#[async_trait]
impl NewsFetcher for EarningsCalendarFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<KbEntryDraft>> {
        let text = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .map_err(MeridianError::from)?
            .text()
            .await?;

        let drafts = self.parse_csv(&text);
        debug!(rows = drafts.len(), "earnings calendar parsed");
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> EarningsCalendarFetcher {
        EarningsCalendarFetcher::new(
            "https://calendar.example/earnings.csv",
            &["MSFT".to_string(), "TER".to_string()],
        )
    }

    #[test]
    fn rows_map_to_earnings_entries() {
        let csv = "symbol,name,reportDate,fiscalDateEnding,estimate,currency\n\
                   MSFT,Microsoft Corporation,2025-04-24,2025-03-31,3.21,USD\n\
                   XYZ,Unwatched Corp,2025-04-25,2025-03-31,1.00,USD\n\
                   TER,Teradyne Inc,2025-04-29,2025-03-31,,USD\n";
        let drafts = fetcher().parse_csv(csv);
        assert_eq!(drafts.len(), 2);

        assert_eq!(drafts[0].ticker, "MSFT");
        assert_eq!(drafts[0].event_type, EventType::Earnings);
        assert!(drafts[0].content.contains("Consensus EPS estimate 3.21"));

        // Missing estimate still produces a row, phrased without it.
        assert_eq!(drafts[1].ticker, "TER");
        assert!(!drafts[1].content.contains("estimate"));
    }

    #[test]
    fn bad_dates_are_skipped() {
        let csv = "symbol,name,reportDate\nMSFT,Microsoft,not-a-date\n";
        assert!(fetcher().parse_csv(csv).is_empty());
    }

    #[test]
    fn missing_columns_yield_nothing() {
        let csv = "foo,bar\n1,2\n";
        assert!(fetcher().parse_csv(csv).is_empty());
    }
}
