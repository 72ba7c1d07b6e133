// =============================================================================
// Sentiment enricher — LLM scoring of unsentimented rows
// =============================================================================
//
// Scores live in [0,1]: 0 = strongly bearish, 1 = strongly bullish, 0.5 =
// neutral. The prompt demands strict JSON; rows whose responses do not parse
// are left NULL for the next sweep. Transport failures abort the batch —
// the endpoint being down will not fix itself row by row.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::kb::KnowledgeBase;
use crate::providers::llm::extract_json;
use crate::providers::LlmProvider;

const SYSTEM_PROMPT: &str = "You are a markets sentiment rater. Given a news item, respond \
with strict JSON {\"score\": <float 0..1>, \"insight\": \"<one sentence>\"} where 0 is \
strongly bearish for the instrument, 0.5 is neutral, and 1 is strongly bullish. No prose.";

const MAX_TOKENS: u32 = 200;
/// Pause between LLM calls; keeps the enricher inside provider rate limits.
const PACING: Duration = Duration::from_millis(500);

#[derive(Debug, Default, serde::Serialize)]
pub struct SentimentSummary {
    pub scored: usize,
    pub parse_failures: usize,
    pub aborted: bool,
}

pub struct SentimentEnricher {
    kb: Arc<KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
    clock: Clock,
}

impl SentimentEnricher {
    pub fn new(kb: Arc<KnowledgeBase>, llm: Arc<dyn LlmProvider>, clock: Clock) -> Self {
        Self { kb, llm, clock }
    }

    /// Score up to `limit` rows no older than `max_age_days`.
    pub async fn enrich_pending(&self, max_age_days: i64, limit: i64) -> Result<SentimentSummary> {
        let as_of = self.clock.now().naive_utc();
        let pending = self.kb.pending_sentiment(max_age_days, limit, as_of).await?;
        let mut summary = SentimentSummary::default();

        for (id, content) in pending {
            match self
                .llm
                .generate(SYSTEM_PROMPT, &content, MAX_TOKENS, 0.0)
                .await
            {
                Ok(resp) => match parse_score(&resp.text) {
                    Some((score, insight)) => {
                        if self.kb.update_sentiment(id, score, &insight).await? {
                            summary.scored += 1;
                        }
                    }
                    None => {
                        warn!(id, "unparseable sentiment response — row left for next sweep");
                        summary.parse_failures += 1;
                    }
                },
                Err(e) if e.is_transient() => {
                    // Endpoint trouble: stop the batch, the scheduler retries
                    // on the next tick.
                    warn!(id, error = %e, "LLM transport error — aborting batch");
                    summary.aborted = true;
                    break;
                }
                Err(e) => {
                    warn!(id, error = %e, "LLM rejected the prompt — skipping row");
                    summary.parse_failures += 1;
                }
            }

            tokio::time::sleep(PACING).await;
        }

        info!(
            scored = summary.scored,
            parse_failures = summary.parse_failures,
            aborted = summary.aborted,
            "sentiment enrichment complete"
        );
        Ok(summary)
    }
}

/// Parse the model's `{"score", "insight"}` payload; scores are clamped into
/// [0,1] so a drifting model cannot violate the KB invariant.
fn parse_score(raw: &str) -> Option<(f64, String)> {
    let json_str = extract_json(raw).ok()?;
    let value: serde_json::Value = serde_json::from_str(&json_str).ok()?;
    let score = value["score"].as_f64()?;
    let insight = value["insight"].as_str().unwrap_or("").to_string();
    Some((score.clamp(0.0, 1.0), insight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_payload() {
        let (score, insight) =
            parse_score(r#"{"score": 0.82, "insight": "strong quarter"}"#).unwrap();
        assert!((score - 0.82).abs() < 1e-9);
        assert_eq!(insight, "strong quarter");
    }

    #[test]
    fn clamps_out_of_range_scores() {
        let (score, _) = parse_score(r#"{"score": -0.4, "insight": "x"}"#).unwrap();
        assert_eq!(score, 0.0);
        let (score, _) = parse_score(r#"{"score": 3.0, "insight": "x"}"#).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn tolerates_fenced_output() {
        let raw = "```json\n{\"score\": 0.5, \"insight\": \"meh\"}\n```";
        assert!(parse_score(raw).is_some());
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_score("the vibes are bad").is_none());
        assert!(parse_score(r#"{"insight": "no score"}"#).is_none());
    }
}
