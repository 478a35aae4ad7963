/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Rounds to two decimal places, the precision of every reported statistic.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Percentage by which `value` exceeds `base`. Returns 0.0 when `base` is 0.
pub fn percent_change(value: f64, base: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    (value - base) / base * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_stddev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&v);
        assert_eq!(m, 5.0);
        assert_eq!(stddev(&v, m), 2.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(21.255_1), 21.26);
        assert_eq!(round2(-0.004), -0.0);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(150.0, 100.0), 50.0);
        assert_eq!(percent_change(5.0, 0.0), 0.0);
    }
}
