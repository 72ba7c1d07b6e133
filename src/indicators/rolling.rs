// =============================================================================
// Rolling-window statistics — trailing mean and corrected sample stddev
// =============================================================================

/// Trailing mean over the most recent `window` values, aligned with the
/// input. Entries before the window is full are `None`.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            Some(slice.iter().sum::<f64>() / window as f64)
        })
        .collect()
}

/// Trailing corrected (n−1) sample standard deviation over the most recent
/// `window` values, aligned with the input.
pub fn trailing_stddev(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }

    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (window as f64 - 1.0);
            Some(var.sqrt())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_warms_up() {
        let out = trailing_mean(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 5);
        assert_eq!(out[0], None);
        assert_eq!(out[3], None);
        assert_eq!(out[4], Some(3.0));
        assert_eq!(out[5], Some(4.0));
    }

    #[test]
    fn mean_short_series_is_all_none() {
        let out = trailing_mean(&[1.0, 2.0, 3.0], 5);
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn stddev_matches_hand_computation() {
        // Sample stddev of [2, 4, 4, 4, 6] is sqrt(8/4) = sqrt(2).
        let out = trailing_stddev(&[2.0, 4.0, 4.0, 4.0, 6.0], 5);
        let v = out[4].unwrap();
        assert!((v - 2.0_f64.sqrt()).abs() < 1e-12, "got {v}");
    }

    #[test]
    fn stddev_constant_series_is_zero() {
        let out = trailing_stddev(&[7.0; 10], 5);
        assert_eq!(out[9], Some(0.0));
    }

    #[test]
    fn degenerate_windows() {
        assert!(trailing_mean(&[1.0, 2.0], 0).iter().all(Option::is_none));
        assert!(trailing_stddev(&[1.0, 2.0], 1).iter().all(Option::is_none));
    }
}
