// =============================================================================
// Embedding providers — local model server, Gemini, OpenAI, fallback chain
// =============================================================================
//
// Every provider returns exactly 768 dimensions at unit L2 norm; remote
// providers are pinned to that width via their request parameters
// (`outputDimensionality` / `dimensions`). Selection is configuration
// driven: the local model is preferred, and its failure falls through to
// the configured remote when one is enabled.
// =============================================================================

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::config::Settings;
use crate::error::{MeridianError, Result};
use crate::providers::{finish_embedding, EmbeddingProvider, EMBEDDING_DIM};

const HTTP_TIMEOUT_SECS: u64 = 30;

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .expect("failed to build reqwest client")
}

async fn classify_status(resp: reqwest::Response, provider: &str) -> Result<serde_json::Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let msg = format!("{provider} returned {status}: {body}");
        return if status.is_server_error() || status.as_u16() == 429 {
            Err(MeridianError::Transient(msg))
        } else {
            Err(MeridianError::Permanent(msg))
        };
    }
    resp.json()
        .await
        .map_err(|e| MeridianError::Permanent(format!("{provider} response not JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Local model server
// ---------------------------------------------------------------------------

/// HTTP front of a locally hosted sentence-embedding model.
pub struct LocalEmbedder {
    endpoint: String,
    client: reqwest::Client,
}

impl LocalEmbedder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: build_client(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    #[instrument(skip(self, text), name = "embed::local")]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let body = classify_status(resp, "local embedder").await?;
        let vector: Vec<f32> = body["embedding"]
            .as_array()
            .ok_or_else(|| MeridianError::Permanent("local embedder: no 'embedding' field".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        finish_embedding(vector, "local embedder")
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Gemini embedContent with `outputDimensionality` pinned to 768.
pub struct GeminiEmbedder {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiEmbedder {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: build_client(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    #[instrument(skip(self, text), name = "embed::gemini", fields(model = %self.model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent?key={}",
            self.model, self.api_key
        );
        let payload = json!({
            "content": { "parts": [ { "text": text } ] },
            "outputDimensionality": EMBEDDING_DIM,
        });

        let resp = self.client.post(&url).json(&payload).send().await?;
        let body = classify_status(resp, "gemini").await?;

        let vector: Vec<f32> = body["embedding"]["values"]
            .as_array()
            .ok_or_else(|| MeridianError::Permanent("gemini: no embedding values".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        finish_embedding(vector, "gemini")
    }
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// OpenAI embeddings with `dimensions` pinned to 768.
pub struct OpenAiEmbedder {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            client: build_client(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    #[instrument(skip(self, text), name = "embed::openai", fields(model = %self.model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let payload = json!({
            "model": self.model,
            "input": text,
            "dimensions": EMBEDDING_DIM,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let body = classify_status(resp, "openai embeddings").await?;
        let vector: Vec<f32> = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| MeridianError::Permanent("openai: no embedding data".into()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        finish_embedding(vector, "openai embeddings")
    }
}

// ---------------------------------------------------------------------------
// Fallback chain
// ---------------------------------------------------------------------------

/// Primary provider with an optional remote fallback. The fallback is
/// consulted on any primary failure (the local model being down is the
/// common case).
pub struct FallbackEmbedder {
    primary: Box<dyn EmbeddingProvider>,
    fallback: Option<Box<dyn EmbeddingProvider>>,
}

impl FallbackEmbedder {
    pub fn new(
        primary: Box<dyn EmbeddingProvider>,
        fallback: Option<Box<dyn EmbeddingProvider>>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.primary.embed(text).await {
            Ok(v) => Ok(v),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(error = %primary_err, "primary embedder failed — using fallback");
                    fallback.embed(text).await
                }
                None => Err(primary_err),
            },
        }
    }
}

/// Assemble the embedding capability from settings. Returns `None` when no
/// provider is configured at all (similar-event search then degrades to
/// empty results).
pub fn from_settings(settings: &Settings) -> Option<Box<dyn EmbeddingProvider>> {
    let remote: Option<Box<dyn EmbeddingProvider>> = if settings.get_bool("use_gemini_embeddings", false) {
        let key = settings
            .get("gemini_api_key")
            .map(str::to_string)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .unwrap_or_default();
        Some(Box::new(GeminiEmbedder::new("text-embedding-004", key)))
    } else if settings.get_bool("use_openai_embeddings", false) {
        let key = settings
            .get("openai_api_key")
            .map(str::to_string)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        Some(Box::new(OpenAiEmbedder::new("text-embedding-3-small", key)))
    } else {
        None
    };

    match settings.get("embedding_endpoint") {
        Some(endpoint) => {
            debug!(endpoint, "local embedder configured");
            Some(Box::new(FallbackEmbedder::new(
                Box::new(LocalEmbedder::new(endpoint)),
                remote,
            )))
        }
        None => remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Canned {
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for Canned {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MeridianError::Transient("down".into()))
            } else {
                finish_embedding(vec![1.0; EMBEDDING_DIM], "canned")
            }
        }
    }

    #[tokio::test]
    async fn fallback_engages_on_primary_failure() {
        let chain = FallbackEmbedder::new(
            Box::new(Canned {
                fail: true,
                calls: AtomicU32::new(0),
            }),
            Some(Box::new(Canned {
                fail: false,
                calls: AtomicU32::new(0),
            })),
        );
        let v = chain.embed("hello").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn no_fallback_propagates_error() {
        let chain = FallbackEmbedder::new(
            Box::new(Canned {
                fail: true,
                calls: AtomicU32::new(0),
            }),
            None,
        );
        assert!(chain.embed("hello").await.is_err());
    }
}
