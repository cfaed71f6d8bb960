//! Small numeric helpers over latency slices.
//!
//! Semantics follow the usual data-analysis conventions: population
//! standard deviation, linear-interpolated percentiles, and an
//! exponentially weighted mean seeded with the first sample.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation; 0 for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    let Some(m) = mean(values) else {
        return 0.0;
    };
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// `q`-th percentile (0..=100) with linear interpolation between ranks.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`, no bias adjustment.
pub fn ewm(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            None => v,
            Some(p) => (1.0 - alpha) * p + alpha * v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Least-squares slope of `values` against their indices; 0 below two points.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    num / den
}

/// Running sum of `value - reference`.
pub fn cumsum_deviation(values: &[f64], reference: f64) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v - reference;
            Some(*acc)
        })
        .collect()
}
