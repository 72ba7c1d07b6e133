// =============================================================================
// Embedding backfill — fill NULL vectors, batched, monotonic
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::kb::KnowledgeBase;
use crate::providers::EmbeddingProvider;

/// Content longer than this is truncated before embedding; model context is
/// finite and news bodies occasionally are not.
const MAX_EMBED_CHARS: usize = 8000;

#[derive(Debug, Default, serde::Serialize)]
pub struct BackfillSummary {
    pub embedded: usize,
    pub failures: usize,
}

pub struct EmbeddingBackfill {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingBackfill {
    pub fn new(kb: Arc<KnowledgeBase>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { kb, embedder }
    }

    /// Embed up to `limit` rows, committing after each batch of
    /// `batch_size`. Per-row failures are skipped; a transient provider
    /// failure ends the run early (the hourly sweep will resume).
    pub async fn backfill(&self, limit: i64, batch_size: usize) -> Result<BackfillSummary> {
        let pending = self.kb.pending_embedding(limit).await?;
        let mut summary = BackfillSummary::default();

        for batch in pending.chunks(batch_size.max(1)) {
            for (id, content) in batch {
                let text = truncate_chars(content, MAX_EMBED_CHARS);
                match self.embedder.embed(text).await {
                    Ok(vector) => {
                        if self.kb.set_embedding(*id, vector).await? {
                            summary.embedded += 1;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        warn!(id, error = %e, "embedding provider down — stopping backfill");
                        self.finish(&summary).await;
                        return Ok(summary);
                    }
                    Err(e) => {
                        warn!(id, error = %e, "embedding failed for row — skipped");
                        summary.failures += 1;
                    }
                }
            }
        }

        self.finish(&summary).await;
        Ok(summary)
    }

    async fn finish(&self, summary: &BackfillSummary) {
        if summary.embedded > 0 {
            if let Err(e) = self.kb.ensure_vector_index().await {
                warn!(error = %e, "vector index creation failed");
            }
        }
        info!(
            embedded = summary.embedded,
            failures = summary.failures,
            "embedding backfill complete"
        );
    }
}

/// Truncate at a char boundary without splitting a code point.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte chars must not be split.
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
