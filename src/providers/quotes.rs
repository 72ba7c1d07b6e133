// =============================================================================
// Chart feed client — daily bars and pre-market snapshots over REST
// =============================================================================
//
// Speaks the de-facto chart-API symbol convention:
//   plain for stocks      MSFT
//   XXXYYY=X for FX       EURUSD=X
//   =F for futures        GC=F
//   -USD for crypto       BTC-USD
//   ^NAME for indexes     ^GSPC
//
// Responses arrive as { chart: { result: [ { meta, timestamp[],
// indicators: { quote: [ { close[], volume[] } ] } } ] } }.
// =============================================================================

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{debug, instrument};

use crate::error::{MeridianError, Result};
use crate::providers::{PremarketQuote, ProviderBar, QuoteProvider};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const HTTP_TIMEOUT_SECS: u64 = 30;

pub struct ChartFeedClient {
    base_url: String,
    client: reqwest::Client,
}

impl ChartFeedClient {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("meridian/1.0")
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    async fn fetch_chart(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MeridianError::Permanent(format!("chart response not JSON: {e}")))?;

        if !status.is_success() {
            let msg = format!("chart API returned {status}: {body}");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(MeridianError::Transient(msg))
            } else {
                Err(MeridianError::Permanent(msg))
            };
        }
        Ok(body)
    }

    /// Pull `timestamp[]` / `close[]` / `volume[]` out of a chart result,
    /// dropping null entries (holidays and half-days report nulls).
    fn parse_daily_series(result: &serde_json::Value) -> Result<Vec<ProviderBar>> {
        let timestamps = result["timestamp"]
            .as_array()
            .ok_or_else(|| MeridianError::Permanent("chart result missing timestamps".into()))?;
        let quote = &result["indicators"]["quote"][0];
        let closes = quote["close"]
            .as_array()
            .ok_or_else(|| MeridianError::Permanent("chart result missing closes".into()))?;
        let volumes = quote["volume"].as_array();

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let Some(epoch) = ts.as_i64() else { continue };
            let Some(close) = closes.get(i).and_then(|v| v.as_f64()) else {
                continue;
            };
            let volume = volumes
                .and_then(|v| v.get(i))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);

            let Some(dt) = Utc.timestamp_opt(epoch, 0).single() else {
                continue;
            };
            bars.push(ProviderBar {
                date: dt.date_naive(),
                close,
                volume,
            });
        }

        // One bar per date; the feed occasionally repeats the live bar.
        bars.dedup_by_key(|b| b.date);
        Ok(bars)
    }
}

#[async_trait]
impl QuoteProvider for ChartFeedClient {
    #[instrument(skip(self), name = "quotes::get_bars")]
    async fn get_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderBar>> {
        let period1 = from
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(0);
        let period2 = to
            .and_hms_opt(23, 59, 59)
            .map(|t| t.and_utc().timestamp())
            .unwrap_or(0);

        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url, ticker, period1, period2
        );

        let body = self.fetch_chart(&url).await?;
        let result = &body["chart"]["result"][0];
        if result.is_null() {
            return Err(MeridianError::Permanent(format!(
                "chart API has no data for {ticker}: {}",
                body["chart"]["error"]
            )));
        }

        let bars = Self::parse_daily_series(result)?;
        debug!(ticker, count = bars.len(), "daily bars fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "quotes::get_premarket")]
    async fn get_premarket(&self, ticker: &str) -> Result<PremarketQuote> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=1d&interval=5m&includePrePost=true",
            self.base_url, ticker
        );

        let body = self.fetch_chart(&url).await?;
        let result = &body["chart"]["result"][0];
        let meta = &result["meta"];

        let prev_close = meta["chartPreviousClose"]
            .as_f64()
            .or_else(|| meta["previousClose"].as_f64())
            .ok_or_else(|| {
                MeridianError::Permanent(format!("no previous close for {ticker}"))
            })?;

        // Last non-null 5m close is the most recent pre/post-market trade.
        let closes = result["indicators"]["quote"][0]["close"].as_array();
        let last = closes
            .and_then(|arr| arr.iter().rev().find_map(|v| v.as_f64()))
            .or_else(|| meta["regularMarketPrice"].as_f64())
            .ok_or_else(|| {
                MeridianError::DataGap(format!("no off-hours trades for {ticker}"))
            })?;

        let ts = meta["regularMarketTime"]
            .as_i64()
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(Utc::now);

        debug!(ticker, last, prev_close, "premarket snapshot fetched");
        Ok(PremarketQuote {
            last,
            prev_close,
            ts,
        })
    }
}

impl std::fmt::Debug for ChartFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartFeedClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Parse an RFC-3339-ish provider timestamp, tolerating a missing offset.
pub fn parse_provider_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .with_context(|| format!("unparseable timestamp '{raw}'"))?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_daily_series_drops_nulls() {
        let result = serde_json::json!({
            "timestamp": [1741564800_i64, 1741651200_i64, 1741737600_i64],
            "indicators": { "quote": [ {
                "close": [300.0, null, 305.5],
                "volume": [1000, null, 2000]
            } ] }
        });
        let bars = ChartFeedClient::parse_daily_series(&result).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 300.0);
        assert_eq!(bars[1].close, 305.5);
        assert_eq!(bars[1].volume, 2000);
        assert!(bars[0].date < bars[1].date);
    }

    #[test]
    fn parse_daily_series_rejects_malformed() {
        let result = serde_json::json!({ "indicators": {} });
        assert!(ChartFeedClient::parse_daily_series(&result).is_err());
    }

    #[test]
    fn provider_ts_parsing() {
        assert!(parse_provider_ts("2025-03-10T14:30:00Z").is_ok());
        assert!(parse_provider_ts("2025-03-10T14:30:00").is_ok());
        assert!(parse_provider_ts("not a time").is_err());
    }
}
