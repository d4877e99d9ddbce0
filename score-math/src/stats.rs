//! Summary statistics over score collections

/// Arithmetic mean, or `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Rescale values linearly so the minimum maps to 0 and the maximum to 1.
///
/// NaN values are ignored when finding the range and stay NaN. A constant
/// input (zero range) maps to all zeros.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return values
            .iter()
            .map(|v| if v.is_nan() { f64::NAN } else { 0.0 })
            .collect();
    }

    values.iter().map(|&v| (v - min) / range).collect()
}
