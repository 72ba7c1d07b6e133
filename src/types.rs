// =============================================================================
// Shared types used across the Meridian trading engine
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Pseudo-tickers marking non-instrument macro items.
pub const MACRO_TICKERS: &[&str] = &["MACRO", "US_MACRO"];

/// Whether `ticker` is one of the macro sentinels.
pub fn is_macro_ticker(ticker: &str) -> bool {
    MACRO_TICKERS.contains(&ticker)
}

/// Discrete trading signal produced by strategies and the analyst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSignal {
    #[serde(rename = "STRONG_BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "SELL")]
    Sell,
}

impl TradeSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
        }
    }

    /// Position-sizing weight applied to capital for entry signals.
    pub fn sizing_weight(&self) -> f64 {
        match self {
            Self::StrongBuy => 1.0,
            Self::Buy => 0.5,
            Self::Hold | Self::Sell => 0.0,
        }
    }
}

impl std::fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of a journaled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a knowledge-base entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "NEWS")]
    News,
    #[serde(rename = "EARNINGS")]
    Earnings,
    #[serde(rename = "ECONOMIC_INDICATOR")]
    EconomicIndicator,
    #[serde(rename = "FOMC_STATEMENT")]
    FomcStatement,
    #[serde(rename = "FOMC_SPEECH")]
    FomcSpeech,
    #[serde(rename = "FOMC_MINUTES")]
    FomcMinutes,
    #[serde(rename = "BOE_STATEMENT")]
    BoeStatement,
    #[serde(rename = "ECB_STATEMENT")]
    EcbStatement,
    #[serde(rename = "BOJ_STATEMENT")]
    BojStatement,
    #[serde(rename = "TRADE_SIGNAL")]
    TradeSignal,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "NEWS",
            Self::Earnings => "EARNINGS",
            Self::EconomicIndicator => "ECONOMIC_INDICATOR",
            Self::FomcStatement => "FOMC_STATEMENT",
            Self::FomcSpeech => "FOMC_SPEECH",
            Self::FomcMinutes => "FOMC_MINUTES",
            Self::BoeStatement => "BOE_STATEMENT",
            Self::EcbStatement => "ECB_STATEMENT",
            Self::BojStatement => "BOJ_STATEMENT",
            Self::TradeSignal => "TRADE_SIGNAL",
            Self::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "EARNINGS" => Self::Earnings,
            "ECONOMIC_INDICATOR" => Self::EconomicIndicator,
            "FOMC_STATEMENT" => Self::FomcStatement,
            "FOMC_SPEECH" => Self::FomcSpeech,
            "FOMC_MINUTES" => Self::FomcMinutes,
            "BOE_STATEMENT" => Self::BoeStatement,
            "ECB_STATEMENT" => Self::EcbStatement,
            "BOJ_STATEMENT" => Self::BojStatement,
            "TRADE_SIGNAL" => Self::TradeSignal,
            "MANUAL" => Self::Manual,
            _ => Self::News,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a knowledge-base entry is expected to move markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "HIGH" => Self::High,
            "LOW" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic region an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "USA")]
    Usa,
    #[serde(rename = "UK")]
    Uk,
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "Japan")]
    Japan,
    #[serde(rename = "China")]
    China,
    #[serde(rename = "Switzerland")]
    Switzerland,
    #[serde(rename = "Global")]
    Global,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usa => "USA",
            Self::Uk => "UK",
            Self::Eu => "EU",
            Self::Japan => "Japan",
            Self::China => "China",
            Self::Switzerland => "Switzerland",
            Self::Global => "Global",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "USA" => Self::Usa,
            "UK" => Self::Uk,
            "EU" => Self::Eu,
            "Japan" => Self::Japan,
            "China" => Self::China,
            "Switzerland" => Self::Switzerland,
            _ => Self::Global,
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One daily bar with derived indicators, as stored in `quotes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub volume: i64,
    pub sma_5: Option<f64>,
    pub volatility_5: Option<f64>,
    pub rsi: Option<f64>,
}
