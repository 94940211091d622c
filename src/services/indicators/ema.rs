//! Exponential Moving Average (EMA) indicator.

/// EMA series seeded with the simple average of the first `period` values.
///
/// The first element corresponds to `values[period - 1]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - period + 1);

    let mut ema = values.iter().take(period).sum::<f64>() / period as f64;
    out.push(ema);

    for value in values.iter().skip(period) {
        ema = (value - ema) * multiplier + ema;
        out.push(ema);
    }

    out
}

/// Latest EMA value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}
