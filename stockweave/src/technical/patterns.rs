//! Chart pattern analysis: pivots, trend, crosses, triangles, breakouts.

use serde::{Deserialize, Serialize};

use super::frame::CandleFrame;
use super::{rolling_mean_series, safe_float};

/// Pivot window for support/resistance detection.
const PIVOT_WINDOW: usize = 20;
/// Levels kept per side.
const MAX_LEVELS: usize = 3;

/// One breakout/breakdown event against a known level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BreakoutSignal {
    /// "저항선_돌파" or "지지선_이탈".
    pub signal_type: String,
    pub level: f64,
    pub current_price: f64,
    pub volume_confirmation: bool,
}

/// Full pattern analysis block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChartPatternAnalysis {
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    /// 상승 / 하락 / 횡보 / 불명확
    pub trend_direction: String,
    /// 강함 / 보통 / 약함
    pub trend_strength: String,
    pub patterns: Vec<String>,
    pub breakout_signals: Vec<BreakoutSignal>,
}

/// Least-squares slope of a series against its index.
fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// 3-point pivot lows within the trailing window: a point lower than its two
/// neighbors on each side. Returns the last `MAX_LEVELS`, ascending.
pub fn find_support_levels(low: &[f64]) -> Vec<f64> {
    let tail: Vec<f64> = low
        .iter()
        .rev()
        .take(PIVOT_WINDOW)
        .rev()
        .cloned()
        .collect();
    let mut supports = Vec::new();
    for i in 2..tail.len().saturating_sub(2) {
        if tail[i] < tail[i - 1]
            && tail[i] < tail[i + 1]
            && tail[i] < tail[i - 2]
            && tail[i] < tail[i + 2]
        {
            supports.push(tail[i]);
        }
    }
    supports.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    supports.dedup();
    supports.into_iter().rev().take(MAX_LEVELS).rev().collect()
}

/// Mirror of [`find_support_levels`] for pivot highs; descending, top 3.
pub fn find_resistance_levels(high: &[f64]) -> Vec<f64> {
    let tail: Vec<f64> = high
        .iter()
        .rev()
        .take(PIVOT_WINDOW)
        .rev()
        .cloned()
        .collect();
    let mut resistances = Vec::new();
    for i in 2..tail.len().saturating_sub(2) {
        if tail[i] > tail[i - 1]
            && tail[i] > tail[i + 1]
            && tail[i] > tail[i - 2]
            && tail[i] > tail[i + 2]
        {
            resistances.push(tail[i]);
        }
    }
    resistances.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    resistances.dedup();
    resistances.truncate(MAX_LEVELS);
    resistances
}

/// Trend direction from price vs SMA(5) vs SMA(20) ordering, strength from
/// the 5-day percentage move (>5% 강함, >2% 보통, else 약함).
pub fn analyze_trend(close: &[f64]) -> (String, String) {
    if close.len() < 20 {
        return ("불명확".to_string(), "약함".to_string());
    }
    let sma5 = rolling_mean_series(close, 5);
    let sma20 = rolling_mean_series(close, 20);
    let price = *close.last().expect("non-empty");
    let (Some(&s5), Some(&s20)) = (sma5.last(), sma20.last()) else {
        return ("불명확".to_string(), "약함".to_string());
    };

    let direction = if price > s5 && s5 > s20 {
        "상승"
    } else if price < s5 && s5 < s20 {
        "하락"
    } else {
        "횡보"
    };

    let change_5d = if close.len() >= 5 {
        let prev = close[close.len() - 5];
        ((price - prev) / prev).abs() * 100.0
    } else {
        0.0
    };
    let strength = if change_5d > 5.0 {
        "강함"
    } else if change_5d > 2.0 {
        "보통"
    } else {
        "약함"
    };
    (direction.to_string(), strength.to_string())
}

/// Named patterns: golden/dead cross (SMA20 × SMA50) plus ascending and
/// descending triangles from the linear-fit slopes of the last 10
/// highs/lows.
pub fn identify_patterns(frame: &CandleFrame) -> Vec<String> {
    let mut patterns = Vec::new();
    if frame.len() < 20 {
        return patterns;
    }
    let close = &frame.close;

    if close.len() >= 50 {
        let sma20 = rolling_mean_series(close, 20);
        let sma50 = rolling_mean_series(close, 50);
        let n = close.len();
        if sma20[n - 1] > sma50[n - 1] && sma20[n - 2] <= sma50[n - 2] {
            patterns.push("골든크로스".to_string());
        } else if sma20[n - 1] < sma50[n - 1] && sma20[n - 2] >= sma50[n - 2] {
            patterns.push("데드크로스".to_string());
        }
    }

    let recent_highs: Vec<f64> = frame.high.iter().rev().take(10).rev().cloned().collect();
    let recent_lows: Vec<f64> = frame.low.iter().rev().take(10).rev().cloned().collect();
    if recent_highs.len() >= 5 {
        let high_trend = linear_slope(&recent_highs);
        let low_trend = linear_slope(&recent_lows);
        if high_trend.abs() < 0.5 && low_trend > 0.5 {
            patterns.push("상승삼각형".to_string());
        } else if low_trend.abs() < 0.5 && high_trend < -0.5 {
            patterns.push("하락삼각형".to_string());
        }
    }

    patterns
}

/// Breakouts: price 1% past a resistance, or 1% under a support, with 1.5×
/// average-volume confirmation.
pub fn breakout_signals(
    frame: &CandleFrame,
    support_levels: &[f64],
    resistance_levels: &[f64],
) -> Vec<BreakoutSignal> {
    let mut signals = Vec::new();
    if frame.len() < 5 {
        return signals;
    }
    let Some(current_price) = frame.last_close() else {
        return signals;
    };
    let volume_tail: Vec<f64> = frame
        .volume
        .iter()
        .rev()
        .take(20)
        .rev()
        .cloned()
        .filter(|v| v.is_finite())
        .collect();
    let avg_volume = if volume_tail.is_empty() {
        0.0
    } else {
        volume_tail.iter().sum::<f64>() / volume_tail.len() as f64
    };
    let recent_volume = frame.volume.last().copied().unwrap_or(0.0);
    let volume_confirmation = recent_volume > avg_volume * 1.5;

    for &resistance in resistance_levels {
        if current_price > resistance * 1.01 {
            signals.push(BreakoutSignal {
                signal_type: "저항선_돌파".to_string(),
                level: resistance,
                current_price,
                volume_confirmation,
            });
        }
    }
    for &support in support_levels {
        if current_price < support * 0.99 {
            signals.push(BreakoutSignal {
                signal_type: "지지선_이탈".to_string(),
                level: support,
                current_price,
                volume_confirmation,
            });
        }
    }
    signals
}

/// Runs the full pattern block over one frame.
pub fn analyze_chart_patterns(frame: &CandleFrame) -> ChartPatternAnalysis {
    if frame.is_empty() {
        return ChartPatternAnalysis::default();
    }
    let support_levels = find_support_levels(&frame.low);
    let resistance_levels = find_resistance_levels(&frame.high);
    let (trend_direction, trend_strength) = analyze_trend(&frame.close);
    let patterns = identify_patterns(frame);
    let breakouts = breakout_signals(frame, &support_levels, &resistance_levels);

    ChartPatternAnalysis {
        support_levels: support_levels
            .into_iter()
            .filter_map(safe_float)
            .collect(),
        resistance_levels: resistance_levels
            .into_iter()
            .filter_map(safe_float)
            .collect(),
        trend_direction,
        trend_strength,
        patterns,
        breakout_signals: breakouts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(close: Vec<f64>) -> CandleFrame {
        let n = close.len();
        CandleFrame {
            dates: (0..n).map(|i| format!("d{}", i)).collect(),
            open: close.clone(),
            high: close.iter().map(|c| c + 2.0).collect(),
            low: close.iter().map(|c| c - 2.0).collect(),
            close,
            volume: vec![1000.0; n],
        }
    }

    /// **Scenario**: a V-shaped low inside the window becomes a support
    /// level.
    #[test]
    fn pivot_low_found() {
        let mut low = vec![10.0; 20];
        low[10] = 5.0;
        let supports = find_support_levels(&low);
        assert_eq!(supports, vec![5.0]);
    }

    /// **Scenario**: a spike high inside the window becomes a resistance
    /// level; at most 3 kept, descending.
    #[test]
    fn pivot_highs_capped_at_three() {
        let mut high = vec![10.0; 20];
        high[4] = 20.0;
        high[9] = 22.0;
        high[14] = 21.0;
        let resistances = find_resistance_levels(&high);
        assert_eq!(resistances, vec![22.0, 21.0, 20.0]);
    }

    /// **Scenario**: strictly rising closes read as 상승 with 강함 strength
    /// when the 5-day move is over 5%.
    #[test]
    fn trend_up_strong() {
        let close: Vec<f64> = (0..30).map(|i| 100.0 * 1.02f64.powi(i)).collect();
        let (direction, strength) = analyze_trend(&close);
        assert_eq!(direction, "상승");
        assert_eq!(strength, "강함");
    }

    /// **Scenario**: too-short series is 불명확/약함.
    #[test]
    fn trend_unclear_when_short() {
        let (direction, strength) = analyze_trend(&[1.0, 2.0]);
        assert_eq!(direction, "불명확");
        assert_eq!(strength, "약함");
    }

    /// **Scenario**: SMA20 crossing above SMA50 flags 골든크로스.
    #[test]
    fn golden_cross_detected() {
        // Flat stretch, then one sharp rally bar: both averages were equal at
        // n-2 and the short one leads at n-1.
        let mut close = vec![100.0; 55];
        *close.last_mut().unwrap() = 400.0;
        let patterns = identify_patterns(&frame(close));
        assert!(patterns.contains(&"골든크로스".to_string()), "got {:?}", patterns);
    }

    /// **Scenario**: price 1%+ above a resistance emits 저항선_돌파 with
    /// volume confirmation from a 1.5× spike.
    #[test]
    fn breakout_with_volume_confirmation() {
        let mut f = frame(vec![100.0; 30]);
        *f.close.last_mut().unwrap() = 120.0;
        *f.volume.last_mut().unwrap() = 5000.0;
        let signals = breakout_signals(&f, &[], &[110.0]);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, "저항선_돌파");
        assert!(signals[0].volume_confirmation);
    }
}
