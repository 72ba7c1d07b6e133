// =============================================================================
// Meridian — automated paper-trading assistant, main entry point
// =============================================================================
//
// Startup order: config → database (fatal on failure, exit 3) → providers →
// subsystems → scheduler jobs → API server → wait for ctrl-c → cancel jobs,
// close pool.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyst;
mod api;
mod app_state;
mod clock;
mod config;
mod db;
mod enrich;
mod error;
mod executor;
mod indicators;
mod kb;
mod news;
mod providers;
mod quote_store;
mod risk;
mod scheduler;
mod session;
mod strategy;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analyst::Analyst;
use crate::app_state::AppState;
use crate::clock::Clock;
use crate::config::Settings;
use crate::enrich::embedding::EmbeddingBackfill;
use crate::enrich::outcome::OutcomeAnalyzer;
use crate::enrich::sentiment::SentimentEnricher;
use crate::executor::Executor;
use crate::kb::KnowledgeBase;
use crate::news::aggregator::AggregatorFetcher;
use crate::news::earnings::EarningsCalendarFetcher;
use crate::news::llm_digest::LlmDigestFetcher;
use crate::news::pipeline::IngestPipeline;
use crate::news::rss_feed::RssFetcher;
use crate::news::sentiment_feed::SentimentFeedFetcher;
use crate::news::NewsFetcher;
use crate::providers::embeddings;
use crate::providers::llm::ChatCompletionsClient;
use crate::providers::quotes::ChartFeedClient;
use crate::providers::rsi_feed::RsiFeedClient;
use crate::providers::{EmbeddingProvider, LlmProvider, QuoteProvider, RsiProvider};
use crate::quote_store::QuoteStore;
use crate::risk::{RiskConfig, RiskManager};
use crate::scheduler::{JobSpec, Scheduler};
use crate::session::SessionOracle;

/// Exit code for fatal configuration errors (missing DB URL, bad schema).
const EXIT_CONFIG: i32 = 3;

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian starting up");

    // ── 1. Configuration ─────────────────────────────────────────────────
    let settings = Settings::load();
    let database_url = match settings.database_url() {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "fatal configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // ── 2. Database ──────────────────────────────────────────────────────
    let pool = match db::connect(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "database bootstrap failed");
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Err(e) = db::seed_cash(&pool, settings.initial_cash_usd()).await {
        error!(error = %e, "failed to seed the portfolio");
        std::process::exit(EXIT_CONFIG);
    }

    // ── 3. Capabilities ──────────────────────────────────────────────────
    // A configured backtest_as_of freezes the clock: every quote/KB read is
    // then bounded by that instant and the decision path replays history.
    let clock = match settings.get("backtest_as_of") {
        Some(raw) => match crate::providers::quotes::parse_provider_ts(raw) {
            Ok(at) => {
                warn!(as_of = %at, "REPLAY MODE — clock frozen");
                Clock::fixed(at)
            }
            Err(e) => {
                error!(error = %e, "unparseable backtest_as_of");
                std::process::exit(EXIT_CONFIG);
            }
        },
        None => Clock::wall(),
    };

    let quote_provider: Arc<dyn QuoteProvider> = Arc::new(ChartFeedClient::new(
        settings.get("quote_feed_url").map(str::to_string),
    ));

    let rsi_feed: Option<Arc<dyn RsiProvider>> = settings.get("rsi_feed_url").map(|url| {
        Arc::new(RsiFeedClient::new(
            url,
            settings.get_or("rsi_feed_key", ""),
        )) as Arc<dyn RsiProvider>
    });

    let llm: Option<Arc<dyn LlmProvider>> = ChatCompletionsClient::from_settings(&settings)
        .map(|c| Arc::new(c) as Arc<dyn LlmProvider>);
    let compare: Vec<Arc<dyn LlmProvider>> = ChatCompletionsClient::comparison_clients(&settings)
        .into_iter()
        .map(|c| Arc::new(c) as Arc<dyn LlmProvider>)
        .collect();

    let embedder: Option<Arc<dyn EmbeddingProvider>> =
        embeddings::from_settings(&settings).map(Arc::from);
    if embedder.is_none() {
        warn!("no embedding provider configured — similar-event search disabled");
    }

    // ── 4. Subsystems ────────────────────────────────────────────────────
    let quotes = Arc::new(QuoteStore::new(pool.clone()));
    let kb = Arc::new(KnowledgeBase::new(pool.clone()));
    let session = Arc::new(SessionOracle::new(clock.clone(), quote_provider.clone()));
    let risk_config = RiskConfig::load_or_default(settings.risk_config_path());
    if !std::path::Path::new(settings.risk_config_path()).exists() {
        // Write the defaults out so the operator has a file to edit.
        if let Err(e) = risk_config.save(settings.risk_config_path()) {
            warn!(error = %e, "could not write default risk config");
        }
    }
    let risk = Arc::new(RiskManager::new(risk_config));
    let executor = Arc::new(Executor::new(
        pool.clone(),
        quotes.clone(),
        risk.clone(),
        clock.clone(),
        settings.commission_rate(),
        settings.sandbox_slippage_sell_pct(),
        settings.get_f64("stop_loss_level", 5.0),
    ));
    let analyst = Arc::new(Analyst::new(
        quotes.clone(),
        kb.clone(),
        session.clone(),
        clock.clone(),
        llm.clone(),
        compare,
        embedder.clone(),
    ));

    let state = Arc::new(AppState::new(
        settings.clone(),
        clock.clone(),
        quotes.clone(),
        kb.clone(),
        analyst.clone(),
        executor.clone(),
        session.clone(),
    ));

    // ── 5. News fetchers ─────────────────────────────────────────────────
    let mut fetchers: Vec<Arc<dyn NewsFetcher>> = RssFetcher::central_bank_feeds()
        .into_iter()
        .map(|f| Arc::new(f) as Arc<dyn NewsFetcher>)
        .collect();

    if let (Some(url), Some(key)) = (settings.get("news_api_url"), settings.get("news_api_key")) {
        let quota = settings.get_u64("news_api_daily_quota", 90) as u32;
        for ticker in settings.tickers_fast() {
            fetchers.push(Arc::new(AggregatorFetcher::new(
                format!("newsapi/{ticker}"),
                url,
                key,
                ticker.clone(),
                ticker.clone(),
                vec!["reuters".into(), "bloomberg".into(), "financial-post".into()],
                quota,
            )));
        }
    }

    if let Some(url) = settings.get("earnings_calendar_url") {
        let watch: Vec<String> = settings
            .tickers_fast()
            .into_iter()
            .chain(settings.tickers_medium())
            .collect();
        fetchers.push(Arc::new(EarningsCalendarFetcher::new(url, &watch)));
    }

    if let (Some(url), Some(key)) = (
        settings.get("sentiment_feed_url"),
        settings.get("sentiment_feed_key"),
    ) {
        fetchers.push(Arc::new(SentimentFeedFetcher::new(
            url,
            key,
            settings.tickers_fast(),
        )));
    }

    if let Some(llm) = &llm {
        fetchers.push(Arc::new(LlmDigestFetcher::new(
            llm.clone(),
            settings.trading_cycle_tickers(),
            settings.llm_news_cooldown_hours(),
        )));
    }

    let pipeline = Arc::new(IngestPipeline::new(kb.clone(), fetchers));

    // ── 6. Scheduler jobs ────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let mut sched = Scheduler::new(cancel.clone());

    // update_prices: 22:00 daily (full universe) + every 2 h while the
    // market is open (fast set only).
    {
        let quotes = quotes.clone();
        let provider = quote_provider.clone();
        let rsi_feed = rsi_feed.clone();
        let settings = settings.clone();
        let clock = clock.clone();
        let session = session.clone();
        sched.add_job(
            "update_prices",
            JobSpec::daily(22, 0).also_every_minutes(120),
            move |token| {
                let quotes = quotes.clone();
                let provider = provider.clone();
                let rsi_feed = rsi_feed.clone();
                let settings = settings.clone();
                let clock = clock.clone();
                let session = session.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let full_sweep = chrono::Local::now().hour() == 22;
                    if !full_sweep
                        && session.phase() == crate::session::SessionPhase::Closed
                    {
                        return;
                    }
                    let mut tickers = settings.tickers_fast();
                    if full_sweep {
                        tickers.extend(settings.tickers_medium());
                        tickers.extend(settings.tickers_long());
                    }
                    let lookback = if full_sweep { 365 } else { 30 };
                    quotes
                        .refresh_all(
                            provider.as_ref(),
                            rsi_feed.as_deref(),
                            &tickers,
                            lookback,
                            clock.today(),
                        )
                        .await;
                })
            },
        );
    }

    // fetch_news: hourly.
    {
        let pipeline = pipeline.clone();
        sched.add_job("fetch_news", JobSpec::hourly(0), move |token| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                pipeline.run().await;
            })
        });
    }

    // backfill_embeddings: hourly at +10.
    if let Some(embedder) = embedder.clone() {
        let backfill = Arc::new(EmbeddingBackfill::new(kb.clone(), embedder));
        sched.add_job("backfill_embeddings", JobSpec::hourly(10), move |token| {
            let backfill = backfill.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                if let Err(e) = backfill.backfill(200, 16).await {
                    warn!(error = %e, "embedding backfill failed");
                }
            })
        });
    }

    // sentiment_enrich: hourly at +20, only with an LLM configured.
    if settings.use_llm() && settings.sentiment_auto_calculate() {
        if let Some(llm) = llm.clone() {
            let enricher = Arc::new(SentimentEnricher::new(kb.clone(), llm, clock.clone()));
            sched.add_job("sentiment_enrich", JobSpec::hourly(20), move |token| {
                let enricher = enricher.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    if let Err(e) = enricher.enrich_pending(7, 40).await {
                        warn!(error = %e, "sentiment enrichment failed");
                    }
                })
            });
        }
    }

    // outcome_analyze: 04:00 daily.
    {
        let analyzer = Arc::new(OutcomeAnalyzer::new(kb.clone(), quotes.clone(), clock.clone()));
        sched.add_job("outcome_analyze", JobSpec::daily(4, 0), move |token| {
            let analyzer = analyzer.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                if let Err(e) = analyzer.analyze_ripe_events(7, 200).await {
                    warn!(error = %e, "outcome analysis failed");
                }
            })
        });
    }

    // trading_cycle: 09:00 / 13:00 / 17:00 weekdays.
    {
        let state = state.clone();
        sched.add_job(
            "trading_cycle",
            JobSpec::daily(9, 0).also_daily(13, 0).also_daily(17, 0).weekdays(),
            move |token| {
                let state = state.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let tickers = state.settings.trading_cycle_tickers();
                    if tickers.is_empty() {
                        return;
                    }
                    let records = state
                        .run_trading_cycle(&tickers, state.settings.use_llm(), false)
                        .await;
                    info!(trades = records.len(), "trading cycle finished");
                })
            },
        );
    }

    // intraday_signal: every 5 minutes on weekdays with a per-ticker cooldown.
    {
        let state = state.clone();
        let cooldowns: Arc<Mutex<HashMap<String, chrono::DateTime<Utc>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        sched.add_job(
            "intraday_signal",
            JobSpec::every_minutes(5).weekdays(),
            move |token| {
                let state = state.clone();
                let cooldowns = cooldowns.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    if state.session.phase() != crate::session::SessionPhase::Regular {
                        return;
                    }
                    let cooldown_mins = state.settings.game_5m_cooldown_minutes() as i64;
                    let now = Utc::now();
                    let due: Vec<String> = {
                        let mut map = cooldowns.lock();
                        let due: Vec<String> = state
                            .settings
                            .tickers_fast()
                            .into_iter()
                            .filter(|t| {
                                map.get(t)
                                    .map(|prev| {
                                        (now - *prev).num_minutes() >= cooldown_mins
                                    })
                                    .unwrap_or(true)
                            })
                            .collect();
                        for t in &due {
                            map.insert(t.clone(), now);
                        }
                        due
                    };
                    if due.is_empty() {
                        return;
                    }
                    let records = state.run_trading_cycle(&due, false, true).await;
                    if !records.is_empty() {
                        info!(trades = records.len(), "intraday signals executed");
                    }
                })
            },
        );
    }

    // premarket_cron: 16:30 local weekdays, when alerts are enabled.
    if settings.premarket_alert() {
        let state = state.clone();
        sched.add_job(
            "premarket_cron",
            JobSpec::daily(16, 30).weekdays(),
            move |token| {
                let state = state.clone();
                Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    for ticker in state.settings.trading_cycle_tickers() {
                        let ctx = state.session.premarket_context(&ticker).await;
                        if let Some(e) = &ctx.error {
                            warn!(ticker = %ticker, error = %e, "premarket check failed");
                            continue;
                        }
                        if ctx.premarket_gap_pct.abs() > 3.0 {
                            warn!(
                                ticker = %ticker,
                                gap_pct = ctx.premarket_gap_pct,
                                minutes_until_open = ?ctx.minutes_until_open,
                                "PREMARKET GAP ALERT"
                            );
                        } else {
                            info!(
                                ticker = %ticker,
                                gap_pct = ctx.premarket_gap_pct,
                                "premarket check"
                            );
                        }
                    }
                })
            },
        );
    }

    tokio::spawn(sched.run());

    // ── 7. API server ────────────────────────────────────────────────────
    let bind_addr = settings.get_or("bind_addr", "0.0.0.0:8080").to_string();
    {
        let app = api::rest::router(state.clone());
        let addr = bind_addr.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %addr, error = %e, "failed to bind API server");
                    return;
                }
            };
            info!(addr = %addr, "API server listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "API server failed");
            }
        });
    }

    info!("all subsystems running — ctrl-c to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    warn!("shutdown signal received — cancelling jobs");
    cancel.cancel();

    // Give in-flight jobs a moment to reach their safe points, then close.
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    pool.close().await;
    info!("Meridian shut down complete");
}
