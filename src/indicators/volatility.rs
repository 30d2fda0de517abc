/// Z-score of the latest value against the last `window` values
///
/// Population standard deviation. A flat window has no dispersion and scores 0.
pub fn close_zscore(closes: &[f64], window: usize) -> f64 {
    if window < 2 || closes.len() < window {
        return 0.0;
    }

    let recent = &closes[closes.len() - window..];
    let mean = recent.iter().sum::<f64>() / window as f64;
    let variance = recent.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / window as f64;
    let std_dev = variance.sqrt();

    if std_dev <= f64::EPSILON {
        return 0.0;
    }

    (recent[window - 1] - mean) / std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zscore_flat_series() {
        assert_eq!(close_zscore(&[5.0; 30], 20), 0.0);
    }

    #[test]
    fn test_zscore_known_value() {
        // mean 2.5, population std sqrt(1.25)
        let z = close_zscore(&[1.0, 2.0, 3.0, 4.0], 4);
        assert!((z - 1.5 / 1.25_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_spike_is_positive() {
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        assert!(close_zscore(&closes, 20) > 3.0);
    }

    #[test]
    fn test_zscore_short_history() {
        assert_eq!(close_zscore(&[1.0, 2.0], 20), 0.0);
    }
}
