// =============================================================================
// Momentum — trend continuation in calm tape with supportive news
// =============================================================================

use crate::strategy::{MarketState, Regime, Strategy, StrategySignal};
use crate::types::TradeSignal;

const STOP_PCT: f64 = 3.0;
const TARGET_PCT: f64 = 8.0;
const MIN_SENTIMENT: f64 = 0.55;
const STRONG_SENTIMENT: f64 = 0.70;

pub struct Momentum;

impl Strategy for Momentum {
    fn regime(&self) -> Regime {
        Regime::Momentum
    }

    /// Price above its 5-day mean, volatility at or below the 20-day
    /// average, and sentiment at least mildly positive.
    fn is_suitable(&self, state: &MarketState) -> bool {
        let (Some(sma), Some(vol), Some(avg_vol)) =
            (state.sma_5, state.volatility_5, state.avg_volatility_20)
        else {
            return false;
        };
        state.close > sma && vol <= avg_vol && state.sentiment >= MIN_SENTIMENT
    }

    fn calculate_signal(&self, state: &MarketState) -> StrategySignal {
        let sma = state.sma_5.unwrap_or(state.close);
        let trend_pct = if sma > 0.0 {
            (state.close - sma) / sma * 100.0
        } else {
            0.0
        };

        let signal = if state.sentiment >= STRONG_SENTIMENT {
            TradeSignal::StrongBuy
        } else {
            TradeSignal::Buy
        };

        // Confidence grows with both trend strength and sentiment margin.
        let confidence = (0.5 + trend_pct.min(5.0) / 20.0
            + (state.sentiment - MIN_SENTIMENT) / 2.0)
            .clamp(0.0, 1.0);

        StrategySignal {
            signal,
            confidence,
            entry_price: state.close,
            stop_pct: STOP_PCT,
            target_pct: TARGET_PCT,
            reason: format!(
                "trend +{trend_pct:.2}% above SMA5, calm volatility, sentiment {:.2}",
                state.sentiment
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_state;

    #[test]
    fn requires_all_three_conditions() {
        let base = test_state();
        assert!(Momentum.is_suitable(&base));

        let below_sma = MarketState { close: 340.0, ..base.clone() };
        assert!(!Momentum.is_suitable(&below_sma));

        let hot_vol = MarketState { volatility_5: Some(3.5), ..base.clone() };
        assert!(!Momentum.is_suitable(&hot_vol));

        let weak_news = MarketState { sentiment: 0.54, ..base.clone() };
        assert!(!Momentum.is_suitable(&weak_news));

        // The 0.55 boundary is inclusive.
        let boundary = MarketState { sentiment: 0.55, ..base };
        assert!(Momentum.is_suitable(&boundary));
    }

    #[test]
    fn strong_sentiment_upgrades_the_signal() {
        let base = test_state();
        let strong = Momentum.calculate_signal(&base);
        assert_eq!(strong.signal, TradeSignal::StrongBuy);

        let mild = Momentum.calculate_signal(&MarketState { sentiment: 0.6, ..base });
        assert_eq!(mild.signal, TradeSignal::Buy);
        assert!(mild.confidence < strong.confidence);
        assert!((0.0..=1.0).contains(&mild.confidence));
    }
}
