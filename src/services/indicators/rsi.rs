//! Relative Strength Index (RSI) indicator.

/// RSI series using Wilder smoothing.
///
/// The first value uses the simple average gain/loss over the first `period` deltas;
/// each later delta is folded in as `avg = (avg * (period - 1) + value) / period`.
/// Returns one value per close from index `period` onward, empty if there are fewer
/// than `period + 1` closes. A zero average loss yields 100.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |d: f64| if d > 0.0 { d } else { 0.0 };
    let loss = |d: f64| if d < 0.0 { -d } else { 0.0 };

    let mut avg_gain = deltas.iter().take(period).map(|d| gain(*d)).sum::<f64>() / period as f64;
    let mut avg_loss = deltas.iter().take(period).map(|d| loss(*d)).sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(deltas.len() - period + 1);
    out.push(rsi_from_averages(avg_gain, avg_loss));

    let p = period as f64;
    for d in deltas.iter().skip(period) {
        avg_gain = (avg_gain * (p - 1.0) + gain(*d)) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss(*d)) / p;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }

    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
