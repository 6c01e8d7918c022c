//! Technical indicators over daily candle series.
//!
//! Rolling/exponential statistics match the conventions of the upstream
//! data tooling: EWMs are span-based and adjusted, rolling stddev uses
//! ddof=1. Indicator outputs are `Option<f64>` with `None` for
//! not-enough-data or non-finite results, so serialized analyses are always
//! plain JSON numbers or null.

pub mod frame;
pub mod patterns;
pub mod signals;

pub use frame::{CandleFrame, FrameError, FramePayload, FrameSchema};

use serde::{Deserialize, Serialize};

/// Converts a computed value to a JSON-safe optional number.
pub(crate) fn safe_float(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Mean of the trailing `window` values, when available.
fn rolling_mean_last(values: &[f64], window: usize) -> Option<f64> {
    if values.len() < window || window == 0 {
        return None;
    }
    let tail = &values[values.len() - window..];
    safe_float(tail.iter().sum::<f64>() / window as f64)
}

/// Rolling mean series; NaN until the window fills.
pub(crate) fn rolling_mean_series(values: &[f64], window: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                f64::NAN
            } else {
                values[i + 1 - window..=i].iter().sum::<f64>() / window as f64
            }
        })
        .collect()
}

/// Rolling sample standard deviation (ddof = 1); NaN until the window fills.
fn rolling_std_series(values: &[f64], window: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window || window < 2 {
                return f64::NAN;
            }
            let tail = &values[i + 1 - window..=i];
            let mean = tail.iter().sum::<f64>() / window as f64;
            let var = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (window as f64 - 1.0);
            var.sqrt()
        })
        .collect()
}

/// Adjusted span-based exponential moving average series.
pub(crate) fn ewm_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut out = Vec::with_capacity(values.len());
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for &value in values {
        numerator = value + decay * numerator;
        denominator = 1.0 + decay * denominator;
        out.push(numerator / denominator);
    }
    out
}

fn rolling_min_series(values: &[f64], window: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                f64::NAN
            } else {
                values[i + 1 - window..=i]
                    .iter()
                    .cloned()
                    .fold(f64::INFINITY, f64::min)
            }
        })
        .collect()
}

fn rolling_max_series(values: &[f64], window: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, _)| {
            if i + 1 < window {
                f64::NAN
            } else {
                values[i + 1 - window..=i]
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max)
            }
        })
        .collect()
}

/// Snapshot of the standard indicator set at the latest candle.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub sma_20: Option<f64>,
    pub sma_60: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
}

/// RSI(period) at the last candle: rolling-mean gains over losses.
fn rsi_last(close: &[f64], period: usize) -> Option<f64> {
    if close.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = close.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();
    let avg_gain = rolling_mean_last(&gains, period)?;
    let avg_loss = rolling_mean_last(&losses, period)?;
    if avg_loss == 0.0 {
        return safe_float(100.0);
    }
    let rs = avg_gain / avg_loss;
    safe_float(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(fast, slow, signal) at the last candle.
fn macd_last(close: &[f64], fast: usize, slow: usize, signal: usize) -> (Option<f64>, Option<f64>, Option<f64>) {
    if close.len() < slow {
        return (None, None, None);
    }
    let ema_fast = ewm_series(close, fast);
    let ema_slow = ewm_series(close, slow);
    let macd: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let macd_signal = ewm_series(&macd, signal);
    let histogram: Vec<f64> = macd
        .iter()
        .zip(&macd_signal)
        .map(|(m, s)| m - s)
        .collect();
    (
        macd.last().copied().and_then(safe_float),
        macd_signal.last().copied().and_then(safe_float),
        histogram.last().copied().and_then(safe_float),
    )
}

/// Bollinger(period, k·σ) at the last candle.
fn bollinger_last(close: &[f64], period: usize, std_dev: f64) -> (Option<f64>, Option<f64>, Option<f64>) {
    if close.len() < period {
        return (None, None, None);
    }
    let sma = rolling_mean_series(close, period);
    let std = rolling_std_series(close, period);
    let (Some(&mid), Some(&sd)) = (sma.last(), std.last()) else {
        return (None, None, None);
    };
    (
        safe_float(mid + sd * std_dev),
        safe_float(mid),
        safe_float(mid - sd * std_dev),
    )
}

/// Stochastic(%K period, %D period) at the last candle.
fn stochastic_last(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> (Option<f64>, Option<f64>) {
    if close.len() < k_period {
        return (None, None);
    }
    let lowest = rolling_min_series(low, k_period);
    let highest = rolling_max_series(high, k_period);
    let k_series: Vec<f64> = close
        .iter()
        .zip(lowest.iter().zip(&highest))
        .map(|(c, (lo, hi))| 100.0 * (c - lo) / (hi - lo))
        .collect();
    let d_series = rolling_mean_series(&k_series, d_period);
    (
        k_series.last().copied().and_then(safe_float),
        d_series.last().copied().and_then(safe_float),
    )
}

/// Computes the full indicator set: SMA(20, 60), EMA(12, 26), RSI(14),
/// MACD(12, 26, 9), Bollinger(20, 2σ), Stochastic(14, 3).
pub fn calculate_indicators(frame: &CandleFrame) -> TechnicalIndicators {
    if frame.is_empty() {
        return TechnicalIndicators::default();
    }
    let close = &frame.close;
    let (macd, macd_signal, macd_histogram) = macd_last(close, 12, 26, 9);
    let (bollinger_upper, bollinger_middle, bollinger_lower) = bollinger_last(close, 20, 2.0);
    let (stochastic_k, stochastic_d) = stochastic_last(&frame.high, &frame.low, close, 14, 3);

    TechnicalIndicators {
        sma_20: rolling_mean_last(close, 20),
        sma_60: rolling_mean_last(close, 60),
        ema_12: (close.len() >= 12)
            .then(|| ewm_series(close, 12).last().copied())
            .flatten()
            .and_then(safe_float),
        ema_26: (close.len() >= 26)
            .then(|| ewm_series(close, 26).last().copied())
            .flatten()
            .and_then(safe_float),
        rsi: rsi_last(close, 14),
        macd,
        macd_signal,
        macd_histogram,
        bollinger_upper,
        bollinger_middle,
        bollinger_lower,
        stochastic_k,
        stochastic_d,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_close(close: Vec<f64>) -> CandleFrame {
        let n = close.len();
        CandleFrame {
            dates: (0..n).map(|i| format!("2024-{:02}-{:02}", 1 + i / 28, 1 + i % 28)).collect(),
            open: close.clone(),
            high: close.iter().map(|c| c + 1.0).collect(),
            low: close.iter().map(|c| c - 1.0).collect(),
            close,
            volume: vec![1000.0; n],
        }
    }

    /// **Scenario**: short series yields None for every windowed indicator
    /// instead of NaN.
    #[test]
    fn short_series_yields_none() {
        let indicators = calculate_indicators(&frame_with_close(vec![1.0, 2.0, 3.0]));
        assert!(indicators.sma_20.is_none());
        assert!(indicators.rsi.is_none());
        assert!(indicators.bollinger_middle.is_none());
        assert!(indicators.stochastic_k.is_none());
    }

    /// **Scenario**: numeric safety — the serialized indicator set contains
    /// only plain numbers or null, never NaN.
    #[test]
    fn serialization_is_json_safe() {
        for len in [3usize, 25, 70] {
            let close: Vec<f64> = (0..len).map(|i| 100.0 + (i as f64).sin() * 5.0).collect();
            let indicators = calculate_indicators(&frame_with_close(close));
            let json = serde_json::to_string(&indicators).expect("must serialize");
            assert!(!json.contains("NaN"));
        }
    }

    /// **Scenario**: constant prices — RSI saturates at 100 when there are
    /// no losses, Bollinger bands collapse onto the mean.
    #[test]
    fn constant_series_edge_cases() {
        let close = vec![50.0; 30];
        let indicators = calculate_indicators(&frame_with_close(close));
        assert_eq!(indicators.sma_20, Some(50.0));
        assert_eq!(indicators.rsi, Some(100.0));
        assert_eq!(indicators.bollinger_middle, Some(50.0));
        assert_eq!(indicators.bollinger_upper, Some(50.0));
    }

    /// **Scenario**: uptrending series puts EMA12 above EMA26 and MACD
    /// positive.
    #[test]
    fn uptrend_macd_positive() {
        let close: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let indicators = calculate_indicators(&frame_with_close(close));
        let ema12 = indicators.ema_12.unwrap();
        let ema26 = indicators.ema_26.unwrap();
        assert!(ema12 > ema26);
        assert!(indicators.macd.unwrap() > 0.0);
        assert!(indicators.rsi.unwrap() > 50.0);
    }

    /// **Scenario**: adjusted EWM of a constant series is the constant.
    #[test]
    fn ewm_constant_is_identity() {
        let series = ewm_series(&[3.0, 3.0, 3.0, 3.0], 5);
        for value in series {
            assert!((value - 3.0).abs() < 1e-12);
        }
    }
}
