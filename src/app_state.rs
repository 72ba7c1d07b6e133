// =============================================================================
// Central application state — Meridian trading assistant
// =============================================================================
//
// Ties the subsystems together for the API façade and the scheduler jobs.
// All durable state lives in PostgreSQL; process-local state is limited to
// the scheduler's job table and the connection pool, which keeps restarts
// trivial.
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::analyst::{Analyst, EntryAdvice};
use crate::clock::Clock;
use crate::config::Settings;
use crate::executor::{ExecutionOutcome, Executor, TradeRecord};
use crate::kb::KnowledgeBase;
use crate::quote_store::QuoteStore;
use crate::session::SessionOracle;
use crate::types::TradeSignal;

pub struct AppState {
    pub settings: Settings,
    pub clock: Clock,
    pub quotes: Arc<QuoteStore>,
    pub kb: Arc<KnowledgeBase>,
    pub analyst: Arc<Analyst>,
    pub executor: Arc<Executor>,
    pub session: Arc<SessionOracle>,
    pub start_time: std::time::Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        clock: Clock,
        quotes: Arc<QuoteStore>,
        kb: Arc<KnowledgeBase>,
        analyst: Arc<Analyst>,
        executor: Arc<Executor>,
        session: Arc<SessionOracle>,
    ) -> Self {
        Self {
            settings,
            clock,
            quotes,
            kb,
            analyst,
            executor,
            session,
            start_time: std::time::Instant::now(),
        }
    }

    /// One full decision-and-execution pass over `tickers`: analyze, act on
    /// the decision under the risk gate, then sweep exit rules. Per-ticker
    /// failures are logged and never abort the cycle.
    pub async fn run_trading_cycle(
        &self,
        tickers: &[String],
        use_llm: bool,
        intraday: bool,
    ) -> Vec<TradeRecord> {
        let phase = self.session.phase();
        let mut records = Vec::new();

        for ticker in tickers {
            let report = match self.analyst.analyze(ticker, use_llm).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "analysis failed — ticker skipped");
                    continue;
                }
            };

            let strategy_name = if intraday {
                format!("{}/5m", report.regime)
            } else {
                report.regime.to_string()
            };

            let outcome = match report.decision {
                TradeSignal::StrongBuy | TradeSignal::Buy => {
                    let avoid = report
                        .premarket
                        .as_ref()
                        .map(|p| p.entry_advice == EntryAdvice::Avoid)
                        .unwrap_or(false);
                    if avoid {
                        info!(ticker = %ticker, "pre-market gap says AVOID — entry skipped");
                        continue;
                    }
                    self.executor
                        .buy(
                            ticker,
                            report.decision,
                            Some(&strategy_name),
                            None,
                            Some(report.entry_price),
                            Some(report.weighted_sentiment),
                            phase,
                        )
                        .await
                }
                TradeSignal::Sell => {
                    self.executor
                        .sell(ticker, "SIGNAL", None, Some(report.weighted_sentiment))
                        .await
                }
                TradeSignal::Hold => continue,
            };

            match outcome {
                Ok(ExecutionOutcome::Executed(record)) => records.push(record),
                Ok(other) => info!(ticker = %ticker, outcome = %other, "no trade"),
                Err(e) => warn!(ticker = %ticker, error = %e, "execution failed"),
            }
        }

        match self.executor.apply_exit_rules().await {
            Ok(closed) => records.extend(closed),
            Err(e) => warn!(error = %e, "exit-rule sweep failed"),
        }

        records
    }
}
