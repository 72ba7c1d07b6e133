// =============================================================================
// News ingestion — pluggable fetchers feeding the knowledge base
// =============================================================================

pub mod aggregator;
pub mod earnings;
pub mod llm_digest;
pub mod pipeline;
pub mod rss_feed;
pub mod sentiment_feed;

use async_trait::async_trait;

use crate::error::Result;
use crate::kb::KbEntryDraft;

/// A single news source. Fetchers are stateless from the pipeline's point of
/// view; any cooldown or quota bookkeeping is interior.
#[async_trait]
pub trait NewsFetcher: Send + Sync {
    /// Stable label used in summaries and as the KB `source` prefix.
    fn name(&self) -> &str;

    /// Pull whatever the source currently offers. Overlapping windows and
    /// repeats are fine — inserts are deduplicated downstream.
    async fn fetch(&self) -> Result<Vec<KbEntryDraft>>;
}
