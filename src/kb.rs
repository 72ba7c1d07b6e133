// =============================================================================
// Knowledge base — unified news/event table with embeddings and outcomes
// =============================================================================
//
// One table holds everything: raw news, central-bank events, earnings rows,
// manual notes, trade signals. Inserts are deduplicated; enrichment columns
// (sentiment_score, insight, embedding, outcome_json) are the only fields
// ever updated after insert, and embedding/outcome writes are monotonic
// (NULL -> value, never value -> value).
//
// Similar-event search is cosine KNN over the nullable `vector(768)` column
// with a lazily created IVF-flat index.
// =============================================================================

use chrono::{Duration, NaiveDateTime};
use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::error::Result;
use crate::providers::EmbeddingProvider;
use crate::types::{is_macro_ticker, EventType, Importance, Region};

/// Minimum embedded rows before the IVF-flat index is worth building.
const VECTOR_INDEX_MIN_ROWS: i64 = 10;

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// A new entry as produced by fetchers / the API, before it has an id.
#[derive(Debug, Clone)]
pub struct KbEntryDraft {
    pub ts: NaiveDateTime,
    pub ticker: String,
    pub source: String,
    pub content: String,
    pub event_type: EventType,
    pub importance: Importance,
    pub region: Region,
    pub link: Option<String>,
    pub sentiment_score: Option<f64>,
}

impl KbEntryDraft {
    /// Batch-dedup fingerprint matching the persistent dedup rule:
    /// (source, link) when a link exists, else (ts, ticker, content hash).
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        match self.link.as_deref().filter(|l| !l.is_empty()) {
            Some(link) => {
                hasher.update(self.source.as_bytes());
                hasher.update(b"|");
                hasher.update(link.as_bytes());
            }
            None => {
                hasher.update(self.ts.to_string().as_bytes());
                hasher.update(b"|");
                hasher.update(self.ticker.as_bytes());
                hasher.update(b"|");
                hasher.update(self.content.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// A stored entry. The embedding itself is not materialised on reads (it is
/// only consumed inside SQL); `has_embedding` flags its presence.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KbEntry {
    pub id: i32,
    pub ts: NaiveDateTime,
    pub ticker: String,
    pub source: String,
    pub content: String,
    pub event_type: EventType,
    pub importance: Importance,
    pub region: Region,
    pub link: Option<String>,
    pub sentiment_score: Option<f64>,
    pub insight: Option<String>,
    pub has_embedding: bool,
    pub outcome_json: Option<serde_json::Value>,
}

/// A similar-event hit with its cosine similarity.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SimilarEvent {
    pub entry: KbEntry,
    pub similarity: f64,
}

/// Optional filters for ad-hoc queries.
#[derive(Debug, Default, Clone)]
pub struct KbFilter {
    pub ticker: Option<String>,
    pub include_macro: bool,
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
    pub event_type: Option<EventType>,
    pub content_like: Option<String>,
    pub limit: i64,
}

const ENTRY_COLUMNS: &str = "id, ts, ticker, source, content, event_type, importance, region,
     link, sentiment_score::float8 AS sentiment_score, insight,
     (embedding IS NOT NULL) AS has_embedding, outcome_json";

/// Sentinel bounds for unset time filters, safely inside the timestamp range.
fn ts_floor() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn ts_ceiling() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(9999, 12, 31)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap()
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> KbEntry {
    KbEntry {
        id: row.get("id"),
        ts: row.get("ts"),
        ticker: row.get("ticker"),
        source: row.get("source"),
        content: row.get("content"),
        event_type: EventType::parse(row.get::<String, _>("event_type").as_str()),
        importance: Importance::parse(row.get::<String, _>("importance").as_str()),
        region: Region::parse(row.get::<String, _>("region").as_str()),
        link: row.get("link"),
        sentiment_score: row.get("sentiment_score"),
        insight: row.get("insight"),
        has_embedding: row.get("has_embedding"),
        outcome_json: row.get("outcome_json"),
    }
}

// ---------------------------------------------------------------------------
// KnowledgeBase
// ---------------------------------------------------------------------------

pub struct KnowledgeBase {
    pool: PgPool,
}

impl KnowledgeBase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ── Insert (deduplicated) ───────────────────────────────────────────

    /// Insert `draft`, or return the id of its deduplication match.
    /// The bool is true when a new row was actually created.
    pub async fn insert(&self, draft: &KbEntryDraft) -> Result<(i32, bool)> {
        let existing = match draft.link.as_deref().filter(|l| !l.is_empty()) {
            Some(link) => {
                sqlx::query("SELECT id FROM knowledge_base WHERE source = $1 AND link = $2 LIMIT 1")
                    .bind(&draft.source)
                    .bind(link)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(
                    "SELECT id FROM knowledge_base
                     WHERE ts = $1 AND ticker = $2 AND md5(content) = md5($3) LIMIT 1",
                )
                .bind(draft.ts)
                .bind(&draft.ticker)
                .bind(&draft.content)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        if let Some(row) = existing {
            return Ok((row.get("id"), false));
        }

        let row = sqlx::query(
            "INSERT INTO knowledge_base
                 (ts, ticker, source, content, event_type, importance, region, link, sentiment_score)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(draft.ts)
        .bind(&draft.ticker)
        .bind(&draft.source)
        .bind(&draft.content)
        .bind(draft.event_type.as_str())
        .bind(draft.importance.as_str())
        .bind(draft.region.as_str())
        .bind(draft.link.as_deref().filter(|l| !l.is_empty()))
        .bind(draft.sentiment_score.map(|s| s.clamp(0.0, 1.0)))
        .fetch_one(&self.pool)
        .await?;

        Ok((row.get("id"), true))
    }

    // ── Enrichment updates (the only mutable columns) ───────────────────

    /// Write sentiment + insight; refuses to overwrite an existing score.
    pub async fn update_sentiment(&self, id: i32, score: f64, insight: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_base SET sentiment_score = $1, insight = $2
             WHERE id = $3 AND sentiment_score IS NULL",
        )
        .bind(score.clamp(0.0, 1.0))
        .bind(insight)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write an embedding; monotonic (never replaces a non-NULL vector).
    pub async fn set_embedding(&self, id: i32, embedding: Vec<f32>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_base SET embedding = $1
             WHERE id = $2 AND embedding IS NULL",
        )
        .bind(Vector::from(embedding))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the outcome record; only fills a NULL slot.
    pub async fn set_outcome(&self, id: i32, outcome: &serde_json::Value) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE knowledge_base SET outcome_json = $1
             WHERE id = $2 AND outcome_json IS NULL",
        )
        .bind(outcome)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn get(&self, id: i32) -> Result<Option<KbEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_entry))
    }

    /// Ad-hoc filtered query used by jobs and the API. Every condition is
    /// neutralised by a sentinel bind when unset so one prepared statement
    /// covers all filter shapes.
    pub async fn query(&self, filter: &KbFilter) -> Result<Vec<KbEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base
             WHERE ($1 = '' OR ticker = $1 OR ($2 AND ticker = ANY($3)))
               AND ts >= $4 AND ts <= $5
               AND ($6 = '' OR event_type = $6)
               AND ($7 = '' OR content ILIKE $7)
             ORDER BY ts DESC LIMIT $8"
        );

        let macro_list: Vec<String> = crate::types::MACRO_TICKERS
            .iter()
            .map(|s| s.to_string())
            .collect();
        let like = filter.content_like.as_ref().map(|s| format!("%{s}%"));

        let rows = sqlx::query(&sql)
            .bind(filter.ticker.as_deref().unwrap_or(""))
            .bind(filter.include_macro)
            .bind(&macro_list)
            .bind(filter.since.unwrap_or(ts_floor()))
            .bind(filter.until.unwrap_or(ts_ceiling()))
            .bind(filter.event_type.map(|e| e.as_str()).unwrap_or(""))
            .bind(like.as_deref().unwrap_or(""))
            .bind(if filter.limit > 0 { filter.limit } else { 100 })
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// Entries for `ticker` since `since`, plus macro entries since
    /// `macro_since`, capped at `as_of`. This is the analyst's news window.
    pub async fn news_window(
        &self,
        ticker: &str,
        since: NaiveDateTime,
        macro_since: NaiveDateTime,
        as_of: NaiveDateTime,
    ) -> Result<Vec<KbEntry>> {
        let macro_list: Vec<String> = crate::types::MACRO_TICKERS
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base
             WHERE ts <= $1
               AND ((ticker = $2 AND ts >= $3) OR (ticker = ANY($4) AND ts >= $5))
             ORDER BY ts DESC"
        ))
        .bind(as_of)
        .bind(ticker)
        .bind(since)
        .bind(&macro_list)
        .bind(macro_since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// Most recent news content for a ticker — the similar-event query text.
    pub async fn latest_content(
        &self,
        ticker: &str,
        as_of: NaiveDateTime,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT content FROM knowledge_base
             WHERE ticker = $1 AND ts <= $2
             ORDER BY ts DESC LIMIT 1",
        )
        .bind(ticker)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("content")))
    }

    // ── Similar-event search ────────────────────────────────────────────

    /// Embed `query_text` and return entries ranked by cosine similarity,
    /// filtered to `>= min_similarity`, optionally restricted to one ticker
    /// and a trailing time window. Unavailable embeddings degrade to an
    /// empty result, never an analyst failure.
    pub async fn similar_to(
        &self,
        embedder: &dyn EmbeddingProvider,
        query_text: &str,
        ticker: Option<&str>,
        window_days: i64,
        limit: i64,
        min_similarity: f64,
        as_of: NaiveDateTime,
    ) -> Result<Vec<SimilarEvent>> {
        let query_vec = embedder.embed(query_text).await?;
        let since = as_of - Duration::days(window_days);

        let sql = format!(
            "SELECT {ENTRY_COLUMNS}, 1 - (embedding <=> $1) AS similarity
             FROM knowledge_base
             WHERE embedding IS NOT NULL AND ts >= $2 AND ts <= $3
               AND ($5 = '' OR ticker = $5)
             ORDER BY embedding <=> $1 LIMIT $4"
        );

        let rows = sqlx::query(&sql)
            .bind(Vector::from(query_vec))
            .bind(since)
            .bind(as_of)
            .bind(limit)
            .bind(ticker.unwrap_or(""))
            .fetch_all(&self.pool)
            .await?;

        let hits: Vec<SimilarEvent> = rows
            .iter()
            .map(|r| SimilarEvent {
                entry: row_to_entry(r),
                similarity: r.get("similarity"),
            })
            .filter(|h| h.similarity >= min_similarity)
            .collect();

        debug!(count = hits.len(), "similar events found");
        Ok(hits)
    }

    pub async fn count_embedded(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT count(*) AS n FROM knowledge_base WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("n"))
    }

    /// Create the IVF-flat cosine index once enough rows carry embeddings.
    pub async fn ensure_vector_index(&self) -> Result<()> {
        if self.count_embedded().await? < VECTOR_INDEX_MIN_ROWS {
            return Ok(());
        }
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kb_embedding
             ON knowledge_base USING ivfflat (embedding vector_cosine_ops)
             WITH (lists = 100)
             WHERE embedding IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        info!("vector index ensured");
        Ok(())
    }

    // ── Enrichment work queues ──────────────────────────────────────────

    /// Rows awaiting sentiment: NULL score, content of useful length,
    /// no older than `max_age_days`.
    pub async fn pending_sentiment(
        &self,
        max_age_days: i64,
        limit: i64,
        as_of: NaiveDateTime,
    ) -> Result<Vec<(i32, String)>> {
        let since = as_of - Duration::days(max_age_days);
        let rows = sqlx::query(
            "SELECT id, content FROM knowledge_base
             WHERE sentiment_score IS NULL
               AND length(content) >= 20
               AND ts >= $1 AND ts <= $2
             ORDER BY ts DESC LIMIT $3",
        )
        .bind(since)
        .bind(as_of)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("id"), r.get("content")))
            .collect())
    }

    /// Rows awaiting an embedding.
    pub async fn pending_embedding(&self, limit: i64) -> Result<Vec<(i32, String)>> {
        let rows = sqlx::query(
            "SELECT id, content FROM knowledge_base
             WHERE embedding IS NULL AND length(content) > 0
             ORDER BY ts DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("id"), r.get("content")))
            .collect())
    }

    /// Events old enough for outcome analysis with no outcome yet, macro
    /// sentinels excluded.
    pub async fn ripe_events(
        &self,
        days_after: i64,
        limit: i64,
        as_of: NaiveDateTime,
    ) -> Result<Vec<KbEntry>> {
        let cutoff = as_of - Duration::days(days_after);
        let macro_list: Vec<String> = crate::types::MACRO_TICKERS
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM knowledge_base
             WHERE outcome_json IS NULL
               AND ts <= $1
               AND NOT (ticker = ANY($2))
             ORDER BY ts LIMIT $3"
        ))
        .bind(cutoff)
        .bind(&macro_list)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(row_to_entry)
            .filter(|e| !is_macro_ticker(&e.ticker))
            .collect())
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft(link: Option<&str>, content: &str) -> KbEntryDraft {
        KbEntryDraft {
            ts: NaiveDate::from_ymd_opt(2025, 3, 10)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
            ticker: "MSFT".into(),
            source: "reuters".into(),
            content: content.into(),
            event_type: EventType::News,
            importance: Importance::Medium,
            region: Region::Usa,
            link: link.map(String::from),
            sentiment_score: None,
        }
    }

    #[test]
    fn fingerprint_uses_source_link_when_present() {
        let a = draft(Some("https://x/1"), "body A");
        let b = draft(Some("https://x/1"), "body B entirely different");
        // Same (source, link) → same fingerprint regardless of content.
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = draft(Some("https://x/2"), "body A");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_falls_back_to_content_hash() {
        let a = draft(None, "the same text");
        let b = draft(None, "the same text");
        let c = draft(None, "different text");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        // An empty link string counts as "no link".
        let d = draft(Some(""), "the same text");
        assert_eq!(a.fingerprint(), d.fingerprint());
    }
}
