// =============================================================================
// External RSI feed — optional capability for instruments where the feed's
// RSI is preferred over the locally computed one
// =============================================================================

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{MeridianError, Result};
use crate::providers::RsiProvider;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// HTTP indicator endpoint returning `{ "value": <rsi> }` per ticker.
pub struct RsiFeedClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RsiFeedClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }
}

#[async_trait]
impl RsiProvider for RsiFeedClient {
    #[instrument(skip(self), name = "rsi_feed::get_rsi")]
    async fn get_rsi(&self, ticker: &str) -> Result<f64> {
        let url = format!(
            "{}/rsi?symbol={}&interval=1day&time_period=14&apikey={}",
            self.base_url, ticker, self.api_key
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MeridianError::Permanent(format!("RSI feed response not JSON: {e}")))?;

        if !status.is_success() {
            let msg = format!("RSI feed returned {status}: {body}");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(MeridianError::Transient(msg))
            } else {
                Err(MeridianError::Permanent(msg))
            };
        }

        let value = body["value"]
            .as_f64()
            .or_else(|| body["values"][0]["rsi"].as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| MeridianError::Permanent(format!("RSI feed: no value for {ticker}")))?;

        if !(0.0..=100.0).contains(&value) {
            return Err(MeridianError::Permanent(format!(
                "RSI feed: {value} out of [0,100] for {ticker}"
            )));
        }

        debug!(ticker, value, "external RSI fetched");
        Ok(value)
    }
}

impl std::fmt::Debug for RsiFeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsiFeedClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
