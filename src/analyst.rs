// =============================================================================
// Analyst — fuses technicals, weighted news sentiment, similar-event
// outcomes, optional LLM guidance, and session context into one decision
// =============================================================================
//
// Decision procedure:
//   1. Read recent bars; technical = BUY when price rides above SMA5 in calm
//      volatility, else HOLD. Fewer than 20 bars → HOLD outright.
//   2. Weighted sentiment over the news window (24 h tickered, 72 h macro).
//   3. Similar past events via cosine search → outcome prior.
//   4. Regime from the strategy selector.
//   5. Optional LLM guidance — it may relabel the regime (including Hold)
//      and re-rate confidence, nothing else.
//   6. Final decision from the regime × technical × sentiment table.
//
// Sentiment is [0,1] everywhere: prompts, storage, aggregation.
// =============================================================================

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::kb::{KbEntry, KnowledgeBase, SimilarEvent};
use crate::providers::llm::extract_json;
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::quote_store::QuoteStore;
use crate::session::{PremarketContext, SessionOracle, SessionPhase};
use crate::strategy::{select, MarketState, Regime};
use crate::types::{is_macro_ticker, EventType, Importance, Region, TradeSignal};

/// News windows.
const TICKER_WINDOW_HOURS: i64 = 24;
const MACRO_WINDOW_HOURS: i64 = 72;

/// Similar-event search parameters.
const SIMILAR_WINDOW_DAYS: i64 = 365;
const SIMILAR_LIMIT: i64 = 10;
const SIMILAR_MIN_SCORE: f64 = 0.60;

/// Bars required before the technicals are trusted at all.
const MIN_BARS: usize = 20;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryAdvice {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "CAUTION")]
    Caution,
    #[serde(rename = "AVOID")]
    Avoid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "price")]
pub enum PremarketEntry {
    #[serde(rename = "ENTER_NOW")]
    EnterNow,
    #[serde(rename = "WAIT_OPEN")]
    WaitOpen,
    #[serde(rename = "LIMIT_BELOW")]
    LimitBelow(f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct PremarketAssessment {
    pub gap_pct: f64,
    pub entry_advice: EntryAdvice,
    pub recommendation: PremarketEntry,
    pub minutes_until_open: Option<i64>,
}

/// Aggregated prior from similar past events.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarOutcomePrior {
    pub sample: usize,
    pub avg_price_change_pct: f64,
    pub success_rate: f64,
    pub confidence: f64,
}

/// What the LLM contributed (label + confidence only).
#[derive(Debug, Clone, Serialize)]
pub struct LlmGuidance {
    pub model: String,
    pub strategy: String,
    pub reasoning: String,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalystReport {
    pub ticker: String,
    pub decision: TradeSignal,
    pub regime: Regime,
    pub technical: TradeSignal,
    pub weighted_sentiment: f64,
    pub news_count: usize,
    pub has_macro_news: bool,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub estimated_upside_pct_day: f64,
    pub suggested_take_profit_price: f64,
    pub session_phase: SessionPhase,
    pub premarket: Option<PremarketAssessment>,
    pub similar_events: Option<SimilarOutcomePrior>,
    pub llm: Option<LlmGuidance>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Pure pieces
// ---------------------------------------------------------------------------

/// Weight of one entry for `ticker`: 2.0 when it is about the ticker (by
/// field or by mention), 1.0 for macro items, 0 otherwise.
fn weight_for(entry: &KbEntry, ticker: &str) -> f64 {
    if entry.ticker == ticker || entry.content.contains(ticker) {
        2.0
    } else if is_macro_ticker(&entry.ticker) {
        1.0
    } else {
        0.0
    }
}

/// Σ(score·w)/Σw over scored entries; 0.5 when nothing is scored. The
/// result is clamped so it always lands in [0,1].
pub fn weighted_sentiment(entries: &[KbEntry], ticker: &str) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for entry in entries {
        let Some(score) = entry.sentiment_score else {
            continue;
        };
        let w = weight_for(entry, ticker);
        if w > 0.0 {
            num += score.clamp(0.0, 1.0) * w;
            den += w;
        }
    }
    if den == 0.0 {
        0.5
    } else {
        (num / den).clamp(0.0, 1.0)
    }
}

/// The regime × technical × sentiment mapping table.
pub fn map_decision(regime: Regime, technical: TradeSignal, sentiment: f64) -> TradeSignal {
    use Regime::*;
    use TradeSignal::*;

    // Columns: tech BUY & s≥0.7 | tech BUY & s≥0.5 | tech HOLD | tech HOLD & s<0.3.
    // A BUY with sentiment below 0.5 falls back to the HOLD column.
    let column = match technical {
        Buy | StrongBuy => {
            if sentiment >= 0.7 {
                0
            } else if sentiment >= 0.5 {
                1
            } else {
                2
            }
        }
        _ => {
            if sentiment < 0.3 {
                3
            } else {
                2
            }
        }
    };

    let row = match regime {
        Momentum => [StrongBuy, Buy, Hold, Hold],
        MeanReversion => [Buy, Hold, Hold, Sell],
        VolatileGap => [StrongBuy, Buy, Hold, Sell],
        Neutral => [Hold, Hold, Hold, Hold],
    };
    row[column]
}

/// Pre-market gap advice: |gap| ≥ 5 % → AVOID and wait for the open;
/// |gap| > 2 % → CAUTION (positive gaps get a limit order set halfway back
/// toward the previous close); otherwise business as usual.
pub fn assess_premarket(ctx: &PremarketContext) -> PremarketAssessment {
    let gap = ctx.premarket_gap_pct;
    let (entry_advice, recommendation) = if gap.abs() >= 5.0 {
        (EntryAdvice::Avoid, PremarketEntry::WaitOpen)
    } else if gap.abs() > 2.0 {
        if gap > 0.0 {
            let limit = ctx.prev_close * (1.0 + gap / 200.0);
            (EntryAdvice::Caution, PremarketEntry::LimitBelow(limit))
        } else {
            (EntryAdvice::Caution, PremarketEntry::WaitOpen)
        }
    } else {
        (EntryAdvice::Normal, PremarketEntry::EnterNow)
    };

    PremarketAssessment {
        gap_pct: gap,
        entry_advice,
        recommendation,
        minutes_until_open: ctx.minutes_until_open,
    }
}

/// Collapse similar events into a prior. Confidence blends similarity with
/// sample size (five events count as a full sample).
pub fn aggregate_prior(hits: &[SimilarEvent]) -> Option<SimilarOutcomePrior> {
    let outcomes: Vec<(f64, f64)> = hits
        .iter()
        .filter_map(|h| {
            let o = h.entry.outcome_json.as_ref()?;
            let change = o.get("price_change_pct")?.as_f64()?;
            Some((change, h.similarity))
        })
        .collect();

    if outcomes.is_empty() {
        return None;
    }

    let sample = outcomes.len();
    let avg_change = outcomes.iter().map(|(c, _)| c).sum::<f64>() / sample as f64;
    let successes = outcomes.iter().filter(|(c, _)| *c > 0.0).count();
    let avg_similarity = outcomes.iter().map(|(_, s)| s).sum::<f64>() / sample as f64;

    Some(SimilarOutcomePrior {
        sample,
        avg_price_change_pct: avg_change,
        success_rate: successes as f64 / sample as f64,
        confidence: (avg_similarity * (sample as f64 / 5.0).min(1.0)).clamp(0.0, 1.0),
    })
}

/// Parse the guidance JSON. `strategy` must be a regime label or "Hold".
fn parse_guidance(model: &str, raw: &str) -> Option<LlmGuidance> {
    let json_str = extract_json(raw).ok()?;
    let v: serde_json::Value = serde_json::from_str(&json_str).ok()?;
    Some(LlmGuidance {
        model: model.to_string(),
        strategy: v["strategy"].as_str()?.to_string(),
        reasoning: v["reasoning"].as_str().unwrap_or("").to_string(),
        confidence: v["confidence"].as_f64().unwrap_or(0.5).clamp(0.0, 1.0),
        entry_price: v["entry_price"].as_f64(),
        stop_loss: v["stop_loss"].as_f64(),
        take_profit: v["take_profit"].as_f64(),
    })
}

/// The guidance label decides which regime row feeds the decision table;
/// "Hold" (or anything unparseable) maps to Neutral.
fn regime_from_guidance(guidance: &LlmGuidance, selector_pick: Regime) -> Regime {
    match guidance.strategy.as_str() {
        "Hold" | "hold" | "HOLD" | "Neutral" => Regime::Neutral,
        other => Regime::parse(other).unwrap_or(selector_pick),
    }
}

// ---------------------------------------------------------------------------
// Analyst
// ---------------------------------------------------------------------------

pub struct Analyst {
    quotes: Arc<QuoteStore>,
    kb: Arc<KnowledgeBase>,
    session: Arc<SessionOracle>,
    clock: Clock,
    llm: Option<Arc<dyn LlmProvider>>,
    compare: Vec<Arc<dyn LlmProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Analyst {
    pub fn new(
        quotes: Arc<QuoteStore>,
        kb: Arc<KnowledgeBase>,
        session: Arc<SessionOracle>,
        clock: Clock,
        llm: Option<Arc<dyn LlmProvider>>,
        compare: Vec<Arc<dyn LlmProvider>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            quotes,
            kb,
            session,
            clock,
            llm,
            compare,
            embedder,
        }
    }

    /// Produce a decision for `ticker`.
    pub async fn analyze(&self, ticker: &str, use_llm: bool) -> Result<AnalystReport> {
        let now = self.clock.now();
        let as_of = now.naive_utc();
        let today = now.date_naive();
        let phase = self.session.phase();

        // ── 1. Technicals ───────────────────────────────────────────────
        let bars = self.quotes.recent_bars(ticker, 30, today).await?;

        // ── 2. News sentiment (always computed, even with thin history) ─
        let news = self
            .kb
            .news_window(
                ticker,
                as_of - Duration::hours(TICKER_WINDOW_HOURS),
                as_of - Duration::hours(MACRO_WINDOW_HOURS),
                as_of,
            )
            .await?;
        let sentiment = weighted_sentiment(&news, ticker);
        let news_count = news.len();
        let has_macro_news = news.iter().any(|e| is_macro_ticker(&e.ticker));

        if bars.len() < MIN_BARS {
            debug!(ticker, bars = bars.len(), "insufficient history — HOLD");
            return Ok(self.degraded_report(
                ticker,
                sentiment,
                news_count,
                has_macro_news,
                phase,
                bars.last().map(|b| b.close).unwrap_or(0.0),
                format!("insufficient history: {} bars < {MIN_BARS}", bars.len()),
            ));
        }

        let last = bars.last().expect("bars checked non-empty");
        let close = last.close;
        let avg_vol_20 = self.quotes.avg_volatility(ticker, 20, today).await?;

        let technical = match (last.sma_5, last.volatility_5, avg_vol_20) {
            (Some(sma), Some(vol), Some(avg)) if close > sma && vol < avg => TradeSignal::Buy,
            _ => TradeSignal::Hold,
        };

        // ── 3. Similar-event prior ──────────────────────────────────────
        let similar = self.similar_prior(ticker, as_of).await;

        // ── 4. Regime ───────────────────────────────────────────────────
        let state = MarketState {
            ticker: ticker.to_string(),
            close,
            sma_5: last.sma_5,
            volatility_5: last.volatility_5,
            avg_volatility_20: avg_vol_20,
            rsi: last.rsi,
            news_count,
            has_macro_news,
            sentiment,
        };
        let (selector_regime, signal) = select(&state);

        // ── 5. Pre-market context ───────────────────────────────────────
        let premarket = if phase == SessionPhase::PreMarket {
            let ctx = self.session.premarket_context(ticker).await;
            if ctx.error.is_none() {
                Some(assess_premarket(&ctx))
            } else {
                warn!(ticker, error = ?ctx.error, "premarket context unavailable");
                None
            }
        } else {
            None
        };

        // ── 6. LLM guidance ─────────────────────────────────────────────
        let guidance = if use_llm {
            self.llm_guidance(ticker, &state, selector_regime, &similar, phase, &premarket)
                .await
        } else {
            None
        };

        let (regime, confidence) = match &guidance {
            Some(g) => (regime_from_guidance(g, selector_regime), g.confidence),
            None => (selector_regime, signal.confidence),
        };
        let (stop_pct, target_pct) = regime.stop_target().unwrap_or((0.0, 0.0));

        // ── 7. Final mapping ────────────────────────────────────────────
        let decision = map_decision(regime, technical, sentiment);
        let estimated_upside_pct_day = target_pct * confidence;
        let suggested_take_profit_price = close * (1.0 + target_pct / 100.0);

        let reason = format!(
            "regime {regime} ({}), technical {technical}, sentiment {sentiment:.2} over {news_count} items{}",
            if guidance.is_some() { "LLM-adjusted" } else { "selector" },
            if has_macro_news { ", macro news present" } else { "" },
        );

        info!(
            ticker,
            decision = %decision,
            regime = %regime,
            technical = %technical,
            sentiment,
            confidence,
            "analysis complete"
        );

        Ok(AnalystReport {
            ticker: ticker.to_string(),
            decision,
            regime,
            technical,
            weighted_sentiment: sentiment,
            news_count,
            has_macro_news,
            confidence,
            entry_price: close,
            stop_pct,
            target_pct,
            estimated_upside_pct_day,
            suggested_take_profit_price,
            session_phase: phase,
            premarket,
            similar_events: similar,
            llm: guidance,
            reason,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn degraded_report(
        &self,
        ticker: &str,
        sentiment: f64,
        news_count: usize,
        has_macro_news: bool,
        phase: SessionPhase,
        close: f64,
        reason: String,
    ) -> AnalystReport {
        AnalystReport {
            ticker: ticker.to_string(),
            decision: TradeSignal::Hold,
            regime: Regime::Neutral,
            technical: TradeSignal::Hold,
            weighted_sentiment: sentiment,
            news_count,
            has_macro_news,
            confidence: 0.0,
            entry_price: close,
            stop_pct: 0.0,
            target_pct: 0.0,
            estimated_upside_pct_day: 0.0,
            suggested_take_profit_price: close,
            session_phase: phase,
            premarket: None,
            similar_events: None,
            llm: None,
            reason,
        }
    }

    /// Look up similar past events and fold them into a prior. Any failure
    /// (no embedder, embedder down, no content) degrades to None.
    async fn similar_prior(&self, ticker: &str, as_of: chrono::NaiveDateTime) -> Option<SimilarOutcomePrior> {
        let embedder = self.embedder.as_ref()?;
        let content = match self.kb.latest_content(ticker, as_of).await {
            Ok(Some(c)) => c,
            _ => return None,
        };

        match self
            .kb
            .similar_to(
                embedder.as_ref(),
                &content,
                None,
                SIMILAR_WINDOW_DAYS,
                SIMILAR_LIMIT,
                SIMILAR_MIN_SCORE,
                as_of,
            )
            .await
        {
            Ok(hits) => aggregate_prior(&hits),
            Err(e) => {
                warn!(ticker, error = %e, "similar-event search unavailable");
                None
            }
        }
    }

    /// Ask the primary model for guidance; fan the same prompt out to the
    /// comparison models, whose answers are stored as side-channel KB rows.
    async fn llm_guidance(
        &self,
        ticker: &str,
        state: &MarketState,
        selector_regime: Regime,
        similar: &Option<SimilarOutcomePrior>,
        phase: SessionPhase,
        premarket: &Option<PremarketAssessment>,
    ) -> Option<LlmGuidance> {
        let llm = self.llm.as_ref()?;
        let system = "You are a trading strategy adviser. Respond with strict JSON \
{\"strategy\": \"Momentum|MeanReversion|VolatileGap|Hold\", \"reasoning\": \"...\", \
\"confidence\": <float 0..1>, \"entry_price\": <float>, \"stop_loss\": <float>, \
\"take_profit\": <float>}. Sentiment values are on a 0..1 scale where 0.5 is neutral.";

        let user = build_guidance_prompt(ticker, state, selector_regime, similar, phase, premarket);

        // Side-channel comparison fan-out; failures are recorded per entry.
        for provider in &self.compare {
            let provider = provider.clone();
            let kb = self.kb.clone();
            let system = system.to_string();
            let user = user.clone();
            let ticker = ticker.to_string();
            let ts = self.clock.now().naive_utc();
            tokio::spawn(async move {
                let label = provider.model_label();
                let content = match provider.generate(&system, &user, 500, 0.2).await {
                    Ok(resp) => format!("guidance[{label}] for {ticker}: {}", resp.text),
                    Err(e) => format!("guidance[{label}] for {ticker} failed: {e}"),
                };
                let draft = crate::kb::KbEntryDraft {
                    ts,
                    ticker,
                    source: format!("model_compare/{label}"),
                    content,
                    event_type: EventType::TradeSignal,
                    importance: Importance::Low,
                    region: Region::Global,
                    link: None,
                    sentiment_score: None,
                };
                if let Err(e) = kb.insert(&draft).await {
                    warn!(error = %e, "failed to store model comparison record");
                }
            });
        }

        match llm.generate(system, &user, 500, 0.2).await {
            Ok(resp) => {
                let parsed = parse_guidance(&llm.model_label(), &resp.text);
                if parsed.is_none() {
                    warn!(ticker, "unparseable LLM guidance — falling back to selector");
                }
                parsed
            }
            Err(e) => {
                warn!(ticker, error = %e, "LLM guidance unavailable — falling back to selector");
                None
            }
        }
    }
}

fn build_guidance_prompt(
    ticker: &str,
    state: &MarketState,
    selector_regime: Regime,
    similar: &Option<SimilarOutcomePrior>,
    phase: SessionPhase,
    premarket: &Option<PremarketAssessment>,
) -> String {
    let mut prompt = format!(
        "Instrument: {ticker}\nClose: {:.4}\nSMA5: {}\nVolatility5: {}\nAvgVolatility20: {}\n\
         RSI: {}\nWeighted sentiment (0..1): {:.2} over {} news items (macro news: {})\n\
         Rule-based regime pick: {selector_regime}\nSession: {phase}\n",
        state.close,
        fmt_opt(state.sma_5),
        fmt_opt(state.volatility_5),
        fmt_opt(state.avg_volatility_20),
        fmt_opt(state.rsi),
        state.sentiment,
        state.news_count,
        state.has_macro_news,
    );

    if let Some(prior) = similar {
        prompt.push_str(&format!(
            "Similar past events ({}): avg change {:+.2}%, success rate {:.0}%\n",
            prior.sample,
            prior.avg_price_change_pct,
            prior.success_rate * 100.0
        ));
    }
    if let Some(pm) = premarket {
        prompt.push_str(&format!(
            "Pre-market gap: {:+.2}% ({} minutes to open)\n",
            pm.gap_pct,
            pm.minutes_until_open.unwrap_or(0)
        ));
    }

    prompt.push_str("Choose the strategy (or Hold) and answer in the required JSON.");
    prompt
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".into())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::gap_pct;
    use chrono::NaiveDate;

    fn entry(ticker: &str, hours_ago_ts: (u32, u32), score: Option<f64>, content: &str) -> KbEntry {
        KbEntry {
            id: 1,
            ts: NaiveDate::from_ymd_opt(2025, 3, 10)
                .unwrap()
                .and_hms_opt(hours_ago_ts.0, hours_ago_ts.1, 0)
                .unwrap(),
            ticker: ticker.into(),
            source: "test".into(),
            content: content.into(),
            event_type: EventType::News,
            importance: Importance::Medium,
            region: Region::Usa,
            link: None,
            sentiment_score: score,
            insight: None,
            has_embedding: false,
            outcome_json: None,
        }
    }

    // ── Weighted sentiment (law L4 and the weighting rules) ─────────────

    #[test]
    fn empty_window_is_neutral() {
        assert_eq!(weighted_sentiment(&[], "MSFT"), 0.5);
    }

    #[test]
    fn ticker_items_weigh_double_macro() {
        let entries = vec![
            entry("MSFT", (9, 0), Some(0.9), "MSFT rallies"),
            entry("US_MACRO", (8, 0), Some(0.3), "FOMC holds rates"),
        ];
        // (0.9·2 + 0.3·1) / 3 = 0.7
        let s = weighted_sentiment(&entries, "MSFT");
        assert!((s - 0.7).abs() < 1e-9);
    }

    #[test]
    fn macro_item_mentioning_ticker_weighs_double() {
        let entries = vec![entry("US_MACRO", (9, 0), Some(0.2), "Tariffs to hit MSFT hard")];
        // Mention upgrades the weight, but with one entry the value is the score.
        assert!((weighted_sentiment(&entries, "MSFT") - 0.2).abs() < 1e-9);

        // Unrelated single-name items carry zero weight.
        let other = vec![entry("AAPL", (9, 0), Some(0.9), "Apple upgraded")];
        assert_eq!(weighted_sentiment(&other, "MSFT"), 0.5);
    }

    #[test]
    fn unscored_entries_do_not_count() {
        let entries = vec![
            entry("MSFT", (9, 0), None, "no score yet"),
            entry("MSFT", (9, 30), Some(0.8), "scored"),
        ];
        assert!((weighted_sentiment(&entries, "MSFT") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn result_is_always_in_unit_interval() {
        for scores in [[0.0, 0.0], [1.0, 1.0], [0.3, 0.9]] {
            let entries: Vec<KbEntry> = scores
                .iter()
                .map(|s| entry("MSFT", (9, 0), Some(*s), "x"))
                .collect();
            let v = weighted_sentiment(&entries, "MSFT");
            assert!((0.0..=1.0).contains(&v));
        }
    }

    // ── Decision table ──────────────────────────────────────────────────

    #[test]
    fn momentum_row() {
        use Regime::Momentum;
        assert_eq!(map_decision(Momentum, TradeSignal::Buy, 0.8), TradeSignal::StrongBuy);
        assert_eq!(map_decision(Momentum, TradeSignal::Buy, 0.6), TradeSignal::Buy);
        assert_eq!(map_decision(Momentum, TradeSignal::Hold, 0.6), TradeSignal::Hold);
        assert_eq!(map_decision(Momentum, TradeSignal::Hold, 0.2), TradeSignal::Hold);
    }

    #[test]
    fn mean_reversion_row() {
        use Regime::MeanReversion;
        assert_eq!(map_decision(MeanReversion, TradeSignal::Buy, 0.75), TradeSignal::Buy);
        assert_eq!(map_decision(MeanReversion, TradeSignal::Buy, 0.55), TradeSignal::Hold);
        assert_eq!(map_decision(MeanReversion, TradeSignal::Hold, 0.45), TradeSignal::Hold);
        assert_eq!(map_decision(MeanReversion, TradeSignal::Hold, 0.25), TradeSignal::Sell);
    }

    #[test]
    fn volatile_gap_row() {
        use Regime::VolatileGap;
        assert_eq!(map_decision(VolatileGap, TradeSignal::Buy, 0.9), TradeSignal::StrongBuy);
        assert_eq!(map_decision(VolatileGap, TradeSignal::Buy, 0.55), TradeSignal::Buy);
        assert_eq!(map_decision(VolatileGap, TradeSignal::Hold, 0.5), TradeSignal::Hold);
        // Seed scenario 3: bearish macro shock on a held long.
        assert_eq!(map_decision(VolatileGap, TradeSignal::Hold, 0.15), TradeSignal::Sell);
    }

    #[test]
    fn neutral_row_always_holds() {
        for tech in [TradeSignal::Buy, TradeSignal::Hold] {
            for s in [0.1, 0.5, 0.9] {
                assert_eq!(map_decision(Regime::Neutral, tech, s), TradeSignal::Hold);
            }
        }
    }

    #[test]
    fn buy_with_weak_sentiment_falls_back_to_hold_column() {
        assert_eq!(map_decision(Regime::Momentum, TradeSignal::Buy, 0.4), TradeSignal::Hold);
    }

    // ── Pre-market advice ───────────────────────────────────────────────

    fn pm_ctx(prev_close: f64, last: f64) -> PremarketContext {
        PremarketContext {
            ticker: "MSFT".into(),
            prev_close,
            premarket_last: last,
            premarket_gap_pct: gap_pct(prev_close, last),
            minutes_until_open: Some(45),
            error: None,
        }
    }

    #[test]
    fn small_gap_is_normal() {
        let a = assess_premarket(&pm_ctx(350.0, 353.0)); // +0.86%
        assert_eq!(a.entry_advice, EntryAdvice::Normal);
        assert_eq!(a.recommendation, PremarketEntry::EnterNow);
    }

    #[test]
    fn seed_scenario_gap_levels() {
        // +2.86% → CAUTION with a limit set half the gap back.
        let caution = assess_premarket(&pm_ctx(350.0, 360.0));
        assert_eq!(caution.entry_advice, EntryAdvice::Caution);
        match caution.recommendation {
            PremarketEntry::LimitBelow(limit) => {
                assert!(limit > 350.0 && limit < 360.0);
            }
            ref other => panic!("expected LimitBelow, got {other:?}"),
        }

        // +5% → AVOID, wait for the open.
        let avoid = assess_premarket(&pm_ctx(350.0, 367.5));
        assert_eq!(avoid.entry_advice, EntryAdvice::Avoid);
        assert_eq!(avoid.recommendation, PremarketEntry::WaitOpen);
    }

    #[test]
    fn gap_down_caution_waits() {
        let a = assess_premarket(&pm_ctx(350.0, 340.0)); // −2.86%
        assert_eq!(a.entry_advice, EntryAdvice::Caution);
        assert_eq!(a.recommendation, PremarketEntry::WaitOpen);
    }

    // ── Similar-event prior ─────────────────────────────────────────────

    fn hit(change_pct: f64, similarity: f64) -> SimilarEvent {
        let mut e = entry("MSFT", (9, 0), Some(0.8), "past event");
        e.outcome_json = Some(serde_json::json!({ "price_change_pct": change_pct }));
        SimilarEvent {
            entry: e,
            similarity,
        }
    }

    #[test]
    fn prior_aggregates_outcomes() {
        let hits = vec![hit(5.0, 0.9), hit(-1.0, 0.8), hit(4.0, 0.7)];
        let prior = aggregate_prior(&hits).unwrap();
        assert_eq!(prior.sample, 3);
        assert!((prior.avg_price_change_pct - (8.0 / 3.0)).abs() < 1e-9);
        assert!((prior.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(prior.confidence > 0.0 && prior.confidence <= 1.0);
    }

    #[test]
    fn hits_without_outcomes_are_ignored() {
        let bare = SimilarEvent {
            entry: entry("MSFT", (9, 0), Some(0.8), "no outcome"),
            similarity: 0.9,
        };
        assert!(aggregate_prior(&[bare]).is_none());
    }

    // ── Guidance parsing ────────────────────────────────────────────────

    #[test]
    fn guidance_parses_and_maps_regimes() {
        let raw = r#"{"strategy": "VolatileGap", "reasoning": "shock", "confidence": 0.7,
                      "entry_price": 100.0, "stop_loss": 93.0, "take_profit": 112.0}"#;
        let g = parse_guidance("test-model", raw).unwrap();
        assert_eq!(g.strategy, "VolatileGap");
        assert_eq!(regime_from_guidance(&g, Regime::Momentum), Regime::VolatileGap);
    }

    #[test]
    fn llm_hold_overrides_directional_pick() {
        let raw = r#"{"strategy": "Hold", "reasoning": "too uncertain", "confidence": 0.9}"#;
        let g = parse_guidance("test-model", raw).unwrap();
        // The LLM may say Hold even when the selector picked Momentum...
        assert_eq!(regime_from_guidance(&g, Regime::Momentum), Regime::Neutral);
        // ...and the final mapping then holds regardless of inputs.
        assert_eq!(map_decision(Regime::Neutral, TradeSignal::Buy, 0.9), TradeSignal::Hold);
    }

    #[test]
    fn unknown_guidance_label_defers_to_selector() {
        let raw = r#"{"strategy": "MoonShot", "reasoning": "?", "confidence": 0.8}"#;
        let g = parse_guidance("test-model", raw).unwrap();
        assert_eq!(regime_from_guidance(&g, Regime::MeanReversion), Regime::MeanReversion);
    }
}
