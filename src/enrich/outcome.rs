// =============================================================================
// Outcome analyzer — post-event price outcomes for ripe KB entries
// =============================================================================
//
// An event is ripe once it is older than the horizon and both anchor quotes
// exist: the nearest trading day at/after the event, and the nearest at/after
// event + N days. Events with missing quotes are skipped (not failed) and
// picked up by a later sweep once the quote store catches up. Macro
// sentinels never get outcomes.
// =============================================================================

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::kb::{KbEntry, KnowledgeBase};
use crate::quote_store::QuoteStore;
use crate::types::Bar;

/// Price-change thresholds for classification, in percent.
const POSITIVE_THRESHOLD_PCT: f64 = 2.0;
const NEGATIVE_THRESHOLD_PCT: f64 = -2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeLabel {
    #[serde(rename = "POSITIVE")]
    Positive,
    #[serde(rename = "NEGATIVE")]
    Negative,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

/// The record stored in `knowledge_base.outcome_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub price_at_event: f64,
    pub price_after: f64,
    pub price_change_pct: f64,
    pub max_up_pct: f64,
    pub max_down_pct: f64,
    pub volatility_change_pct: f64,
    pub outcome: OutcomeLabel,
    pub sentiment_match: Option<bool>,
    pub days_after: i64,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct OutcomeSummary {
    pub analyzed: usize,
    pub skipped_no_quotes: usize,
}

pub struct OutcomeAnalyzer {
    kb: Arc<KnowledgeBase>,
    quotes: Arc<QuoteStore>,
    clock: Clock,
}

impl OutcomeAnalyzer {
    pub fn new(kb: Arc<KnowledgeBase>, quotes: Arc<QuoteStore>, clock: Clock) -> Self {
        Self { kb, quotes, clock }
    }

    /// Analyze up to `limit` ripe events at the `days_after` horizon.
    pub async fn analyze_ripe_events(&self, days_after: i64, limit: i64) -> Result<OutcomeSummary> {
        let as_of = self.clock.now().naive_utc();
        let ripe = self.kb.ripe_events(days_after, limit, as_of).await?;
        let mut summary = OutcomeSummary::default();

        for event in &ripe {
            match self.analyze_one(event, days_after).await {
                Ok(Some(outcome)) => {
                    let value = serde_json::to_value(&outcome)?;
                    if self.kb.set_outcome(event.id, &value).await? {
                        summary.analyzed += 1;
                        debug!(
                            id = event.id,
                            ticker = %event.ticker,
                            change_pct = outcome.price_change_pct,
                            label = ?outcome.outcome,
                            "outcome recorded"
                        );
                    }
                }
                Ok(None) => summary.skipped_no_quotes += 1,
                Err(e) => {
                    warn!(id = event.id, error = %e, "outcome analysis failed for event");
                }
            }
        }

        info!(
            analyzed = summary.analyzed,
            skipped = summary.skipped_no_quotes,
            "outcome sweep complete"
        );
        Ok(summary)
    }

    /// Compute the outcome for one event, or `None` when anchor quotes are
    /// missing.
    async fn analyze_one(&self, event: &KbEntry, days_after: i64) -> Result<Option<Outcome>> {
        let event_date = event.ts.date();
        let horizon_date = event_date + Duration::days(days_after);

        let Some(at_event) = self.quotes.bar_on_or_after(&event.ticker, event_date).await? else {
            return Ok(None);
        };
        let Some(after) = self
            .quotes
            .bar_on_or_after(&event.ticker, horizon_date)
            .await?
        else {
            return Ok(None);
        };

        let window = self
            .quotes
            .bars_between(&event.ticker, at_event.date, after.date)
            .await?;

        Ok(Some(compute_outcome(&at_event, &after, &window, days_after, event.sentiment_score)))
    }
}

/// Pure outcome math over the anchor bars and the interval between them.
pub fn compute_outcome(
    at_event: &Bar,
    after: &Bar,
    window: &[Bar],
    days_after: i64,
    sentiment: Option<f64>,
) -> Outcome {
    let base = at_event.close;
    let change_pct = pct(base, after.close);

    let mut max_up = 0.0_f64;
    let mut max_down = 0.0_f64;
    for bar in window {
        let p = pct(base, bar.close);
        if p > max_up {
            max_up = p;
        }
        if p < max_down {
            max_down = p;
        }
    }

    let volatility_change_pct = match (at_event.volatility_5, after.volatility_5) {
        (Some(before), Some(now)) if before > 0.0 => (now - before) / before * 100.0,
        _ => 0.0,
    };

    let outcome = if change_pct >= POSITIVE_THRESHOLD_PCT {
        OutcomeLabel::Positive
    } else if change_pct <= NEGATIVE_THRESHOLD_PCT {
        OutcomeLabel::Negative
    } else {
        OutcomeLabel::Neutral
    };

    // A score right at 0.5 carries no direction; only compare real signs.
    let sentiment_match = sentiment.map(|s| sign(s - 0.5) == sign(change_pct));

    Outcome {
        price_at_event: base,
        price_after: after.close,
        price_change_pct: change_pct,
        max_up_pct: max_up,
        max_down_pct: max_down,
        volatility_change_pct,
        outcome,
        sentiment_match,
        days_after,
    }
}

fn pct(base: f64, value: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        (value - base) / base * 100.0
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(date: (i32, u32, u32), close: f64, vol5: Option<f64>) -> Bar {
        Bar {
            ticker: "MSFT".into(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            close,
            volume: 0,
            sma_5: None,
            volatility_5: vol5,
            rsi: None,
        }
    }

    #[test]
    fn positive_outcome_with_matching_sentiment() {
        // Seeded scenario: 300 -> 315 over 7 days with sentiment 0.80.
        let at = bar((2025, 3, 10), 300.0, Some(2.0));
        let after = bar((2025, 3, 17), 315.0, Some(2.5));
        let window = vec![
            at.clone(),
            bar((2025, 3, 12), 318.0, None),
            bar((2025, 3, 14), 296.0, None),
            after.clone(),
        ];

        let out = compute_outcome(&at, &after, &window, 7, Some(0.80));
        assert!((out.price_change_pct - 5.0).abs() < 1e-9);
        assert_eq!(out.outcome, OutcomeLabel::Positive);
        assert_eq!(out.sentiment_match, Some(true));
        assert!((out.max_up_pct - 6.0).abs() < 1e-9);
        assert!((out.max_down_pct - (-4.0 / 3.0)).abs() < 1e-9);
        assert!((out.volatility_change_pct - 25.0).abs() < 1e-9);
        assert_eq!(out.days_after, 7);
    }

    #[test]
    fn negative_outcome_against_bullish_sentiment() {
        let at = bar((2025, 3, 10), 100.0, None);
        let after = bar((2025, 3, 17), 95.0, None);
        let out = compute_outcome(&at, &after, &[at.clone(), after.clone()], 7, Some(0.9));
        assert_eq!(out.outcome, OutcomeLabel::Negative);
        assert_eq!(out.sentiment_match, Some(false));
        assert_eq!(out.volatility_change_pct, 0.0);
    }

    #[test]
    fn small_moves_are_neutral() {
        let at = bar((2025, 3, 10), 100.0, None);
        let after = bar((2025, 3, 17), 101.5, None);
        let out = compute_outcome(&at, &after, &[], 7, None);
        assert_eq!(out.outcome, OutcomeLabel::Neutral);
        assert_eq!(out.sentiment_match, None);
    }

    #[test]
    fn label_serializes_uppercase() {
        let at = bar((2025, 3, 10), 100.0, None);
        let after = bar((2025, 3, 17), 110.0, None);
        let out = compute_outcome(&at, &after, &[], 7, Some(0.8));
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["outcome"], "POSITIVE");
        assert_eq!(json["sentiment_match"], true);
        assert_eq!(json["days_after"], 7);
    }
}
