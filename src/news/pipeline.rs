// =============================================================================
// Ingestion pipeline — bounded fan-out, single inserter
// =============================================================================
//
// Fetchers run concurrently under a semaphore (default 4 permits) with a
// per-fetcher timeout. Results funnel into one inserter that owns the DB
// writes, so write contention stays low and backpressure comes for free.
// A failed or stuck fetcher is reported in the summary and never blocks the
// rest of the batch.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::kb::{KbEntryDraft, KnowledgeBase};
use crate::news::NewsFetcher;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one pipeline run: per-source insert counts plus errors.
#[derive(Debug, Default, serde::Serialize)]
pub struct IngestSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub deduplicated: usize,
    pub per_source: Vec<(String, usize)>,
    pub errors: Vec<String>,
}

pub struct IngestPipeline {
    kb: Arc<KnowledgeBase>,
    fetchers: Vec<Arc<dyn NewsFetcher>>,
    workers: usize,
    fetch_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(kb: Arc<KnowledgeBase>, fetchers: Vec<Arc<dyn NewsFetcher>>) -> Self {
        Self {
            kb,
            fetchers,
            workers: DEFAULT_WORKERS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Run every fetcher and persist the merged, deduplicated results.
    pub async fn run(&self) -> IngestSummary {
        let batch_id = uuid::Uuid::new_v4();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(self.fetchers.len());

        for fetcher in &self.fetchers {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            let timeout = self.fetch_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let name = fetcher.name().to_string();
                match tokio::time::timeout(timeout, fetcher.fetch()).await {
                    Ok(Ok(entries)) => (name, Ok(entries)),
                    Ok(Err(e)) => (name, Err(e.to_string())),
                    Err(_) => (name, Err(format!("timed out after {timeout:?}"))),
                }
            }));
        }

        let mut summary = IngestSummary::default();
        let mut drafts: Vec<(String, KbEntryDraft)> = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((source, Ok(entries))) => {
                    summary.fetched += entries.len();
                    for entry in entries {
                        drafts.push((source.clone(), entry));
                    }
                }
                Ok((source, Err(msg))) => {
                    warn!(source = %source, error = %msg, "fetcher failed — continuing with the rest");
                    summary.errors.push(format!("{source}: {msg}"));
                }
                Err(join_err) => {
                    warn!(error = %join_err, "fetcher task panicked");
                    summary.errors.push(format!("task: {join_err}"));
                }
            }
        }

        // In-batch dedup before touching the database; overlapping feeds
        // routinely return the same item.
        let mut seen = HashSet::new();
        drafts.retain(|(_, d)| seen.insert(d.fingerprint()));

        // Single inserter owns the writes.
        let mut per_source: Vec<(String, usize)> = Vec::new();
        for (source, draft) in drafts {
            match self.kb.insert(&draft).await {
                Ok((_, true)) => {
                    summary.inserted += 1;
                    match per_source.iter_mut().find(|(s, _)| *s == source) {
                        Some((_, n)) => *n += 1,
                        None => per_source.push((source, 1)),
                    }
                }
                Ok((_, false)) => summary.deduplicated += 1,
                Err(e) => {
                    warn!(source = %source, error = %e, "insert failed");
                    summary.errors.push(format!("{source}: insert: {e}"));
                }
            }
        }
        summary.per_source = per_source;

        info!(
            batch = %batch_id,
            fetched = summary.fetched,
            inserted = summary.inserted,
            deduplicated = summary.deduplicated,
            errors = summary.errors.len(),
            "ingestion run complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeridianError;
    use crate::types::{EventType, Importance, Region};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn draft(ticker: &str, content: &str, link: Option<&str>) -> KbEntryDraft {
        KbEntryDraft {
            ts: NaiveDate::from_ymd_opt(2025, 3, 10)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            ticker: ticker.into(),
            source: "test-source".into(),
            content: content.into(),
            event_type: EventType::News,
            importance: Importance::Medium,
            region: Region::Usa,
            link: link.map(String::from),
            sentiment_score: None,
        }
    }

    struct Canned(Vec<KbEntryDraft>);

    #[async_trait]
    impl NewsFetcher for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        async fn fetch(&self) -> crate::error::Result<Vec<KbEntryDraft>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl NewsFetcher for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn fetch(&self) -> crate::error::Result<Vec<KbEntryDraft>> {
            Err(MeridianError::Transient("feed down".into()))
        }
    }

    struct Stuck;

    #[async_trait]
    impl NewsFetcher for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }
        async fn fetch(&self) -> crate::error::Result<Vec<KbEntryDraft>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    // The merge/dedup stage is pure; exercise it without a database by
    // replicating the retain step.
    #[test]
    fn batch_dedup_is_by_fingerprint() {
        let items = vec![
            draft("MSFT", "copy one", Some("https://n/1")),
            draft("MSFT", "copy two", Some("https://n/1")), // same (source, link)
            draft("MSFT", "unlinked text", None),
            draft("MSFT", "unlinked text", None), // same content hash
            draft("AAPL", "unlinked text", None), // different ticker → kept
        ];
        let mut seen = HashSet::new();
        let kept: Vec<_> = items
            .into_iter()
            .filter(|d| seen.insert(d.fingerprint()))
            .collect();
        assert_eq!(kept.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_stage_isolates_failures_and_timeouts() {
        // Drive just the fetch stage the way run() does, without a DB.
        let fetchers: Vec<Arc<dyn NewsFetcher>> = vec![
            Arc::new(Canned(vec![draft("MSFT", "hello", Some("https://n/1"))])),
            Arc::new(Failing),
            Arc::new(Stuck),
        ];

        let semaphore = Arc::new(Semaphore::new(DEFAULT_WORKERS));
        let timeout = Duration::from_secs(1);
        let mut handles = Vec::new();
        for fetcher in &fetchers {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let name = fetcher.name().to_string();
                match tokio::time::timeout(timeout, fetcher.fetch()).await {
                    Ok(Ok(entries)) => (name, Ok(entries)),
                    Ok(Err(e)) => (name, Err(e.to_string())),
                    Err(_) => (name, Err("timed out".to_string())),
                }
            }));
        }

        let mut ok = 0;
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                (_, Ok(entries)) => ok += entries.len(),
                (name, Err(msg)) => errors.push(format!("{name}: {msg}")),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("failing:")));
        assert!(errors.iter().any(|e| e.starts_with("stuck:")));
    }
}
