// =============================================================================
// Pluggable capabilities — quote feed, LLM, embeddings, external RSI
// =============================================================================
//
// Every external service sits behind a trait so the engine can swap
// implementations (and tests can inject canned ones). All implementations
// carry their own request timeout; the shared retry helper re-attempts only
// transiently failed calls.
// =============================================================================

pub mod embeddings;
pub mod llm;
pub mod quotes;
pub mod rsi_feed;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{MeridianError, Result};

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Raw daily bar as delivered by a quote feed, before indicator enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBar {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
}

/// Off-hours quote snapshot used by the session oracle.
#[derive(Debug, Clone, Serialize)]
pub struct PremarketQuote {
    pub last: f64,
    pub prev_close: f64,
    pub ts: DateTime<Utc>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Daily bars in `[from, to]`, ascending by date.
    async fn get_bars(&self, ticker: &str, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<ProviderBar>>;

    /// Latest pre/post-market trade plus the previous regular close.
    async fn get_premarket(&self, ticker: &str) -> Result<PremarketQuote>;
}

/// Completion text plus token accounting.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<LlmResponse>;

    /// Stable label for logs and side-channel comparison records.
    fn model_label(&self) -> String;
}

/// Dimensionality every embedding in the knowledge base must have.
pub const EMBEDDING_DIM: usize = 768;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Unit-norm 768-dimensional vector for `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait RsiProvider: Send + Sync {
    async fn get_rsi(&self, ticker: &str) -> Result<f64>;
}

// ---------------------------------------------------------------------------
// Retry helper
// ---------------------------------------------------------------------------

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: u64 = 1;
const RETRY_CAP_SECS: u64 = 15;

/// Run `op`, retrying transient failures with exponential backoff
/// (1 s, 2 s, 4 s … capped at 15 s, 3 attempts). Permanent failures and
/// exhausted retries are returned to the caller.
pub async fn with_retry<T, F, Fut>(label: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = (RETRY_BASE_SECS << (attempt - 1)).min(RETRY_CAP_SECS);
                warn!(label, attempt, delay_secs = delay, error = %e, "transient failure — backing off");
                tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Vector helpers
// ---------------------------------------------------------------------------

/// Scale `v` to unit L2 norm in place. A zero vector is left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Validate provider output: exactly 768 dims, then normalize.
pub fn finish_embedding(mut v: Vec<f32>, provider: &str) -> Result<Vec<f32>> {
    if v.len() != EMBEDDING_DIM {
        return Err(MeridianError::Permanent(format!(
            "{provider} returned {} dims, expected {EMBEDDING_DIM}",
            v.len()
        )));
    }
    l2_normalize(&mut v);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MeridianError::Transient("503".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_touch_permanent() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MeridianError::Permanent("404".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0_f32, 4.0];
        l2_normalize(&mut v);
        let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_untouched() {
        let mut v = vec![0.0_f32; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn finish_embedding_rejects_wrong_dims() {
        let err = finish_embedding(vec![1.0; 512], "test").unwrap_err();
        assert!(matches!(err, MeridianError::Permanent(_)));

        let ok = finish_embedding(vec![1.0; EMBEDDING_DIM], "test").unwrap();
        let norm: f64 = ok.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
