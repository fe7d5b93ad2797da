//! Small descriptive statistics over `f64` slices.
//!
//! NaN values are skipped by every function here.

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub fn mean(values: &[f64]) -> f64 {
    let kept: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Middle value; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> f64 {
    let sorted = finite_sorted(values);
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Population standard deviation.
pub fn pstdev(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let kept: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let var = kept.iter().map(|v| (v - m).powi(2)).sum::<f64>() / kept.len() as f64;
    var.sqrt()
}

/// Most frequent value; ties resolve to the smallest value.
pub fn mode(values: &[f64]) -> f64 {
    let sorted = finite_sorted(values);
    let mut best = f64::NAN;
    let mut best_count = 0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best_count {
            best_count = j - i;
            best = sorted[i];
        }
        i = j;
    }
    best
}

/// Linear-interpolated quantile of already sorted values, `q` in `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

pub fn minimum(values: &[f64]) -> f64 {
    finite_sorted(values).first().copied().unwrap_or(f64::NAN)
}

pub fn maximum(values: &[f64]) -> f64 {
    finite_sorted(values).last().copied().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_pstdev() {
        assert_relative_eq!(pstdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
        assert_eq!(pstdev(&[1.0]), 0.0);
    }

    #[test]
    fn test_mode_prefers_smallest_on_tie() {
        assert_eq!(mode(&[2.0, 1.0, 2.0, 1.0, 3.0]), 1.0);
        assert_eq!(mode(&[5.0, 5.0, 1.0]), 5.0);
    }

    #[test]
    fn test_quantile_matches_linear_rule() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile_sorted(&sorted, 0.5), 2.5);
        assert_relative_eq!(quantile_sorted(&sorted, 1.0 / 3.0), 2.0);
        assert_relative_eq!(quantile_sorted(&sorted, 0.0), 1.0);
    }

    #[test]
    fn test_nan_is_skipped() {
        assert_eq!(median(&[f64::NAN, 1.0, 3.0]), 2.0);
        assert_eq!(minimum(&[f64::NAN, 4.0, 2.0]), 2.0);
        assert_eq!(maximum(&[f64::NAN, 4.0, 2.0]), 4.0);
    }
}
