// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
// Step 1 — Price deltas from consecutive closes.
// Step 2 — Seed average gain / loss with the SMA of the first `period` deltas.
// Step 3 — Wilder smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS = avg_gain / avg_loss; RSI = 100 - 100 / (1 + RS).
// =============================================================================

/// Wilder RSI aligned with the input closes: index `i` holds the RSI for bar
/// `i`, or `None` until `period` deltas are available.
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` closes: all `None`.
/// - Average loss of zero (only gains): RSI clamps to 100.
/// - No movement at all: RSI is 50.
pub fn trailing_rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) =
        deltas[..period]
            .iter()
            .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
                if d > 0.0 {
                    (g + d, l)
                } else {
                    (g, l + d.abs())
                }
            });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for (i, &delta) in deltas.iter().enumerate().skip(period) {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        // Delta `i` is the move from close i to close i+1.
        out[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

/// Convert average gain / loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // flat market
    } else if avg_loss == 0.0 {
        100.0 // only gains
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_degenerate_inputs() {
        assert!(trailing_rsi(&[], 14).is_empty());
        assert!(trailing_rsi(&[1.0, 2.0, 3.0], 0).iter().all(Option::is_none));
        // 14 closes give only 13 deltas — not enough for period 14.
        let closes: Vec<f64> = (1..=14).map(|x| x as f64).collect();
        assert!(trailing_rsi(&closes, 14).iter().all(Option::is_none));
    }

    #[test]
    fn warmup_alignment() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let out = trailing_rsi(&closes, 14);
        assert_eq!(out.len(), closes.len());
        assert!(out[..14].iter().all(Option::is_none));
        assert!(out[14..].iter().all(Option::is_some));
    }

    #[test]
    fn all_gains_is_100() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        for v in trailing_rsi(&closes, 14).into_iter().flatten() {
            assert!((v - 100.0).abs() < 1e-10, "expected 100.0, got {v}");
        }
    }

    #[test]
    fn all_losses_is_0() {
        let closes: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        for v in trailing_rsi(&closes, 14).into_iter().flatten() {
            assert!(v.abs() < 1e-10, "expected 0.0, got {v}");
        }
    }

    #[test]
    fn flat_market_is_50() {
        let closes = vec![100.0; 30];
        for v in trailing_rsi(&closes, 14).into_iter().flatten() {
            assert!((v - 50.0).abs() < 1e-10, "expected 50.0, got {v}");
        }
    }

    #[test]
    fn always_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89,
            46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for v in trailing_rsi(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }
}
