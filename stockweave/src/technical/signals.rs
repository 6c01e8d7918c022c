//! Trading signals and market sentiment derived from the indicator set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::CandleFrame;
use super::{safe_float, TechnicalIndicators};

/// Margin by which buy strength must beat sell strength (or vice versa) for
/// a directional overall signal.
const SIGNAL_MARGIN: f64 = 0.5;
/// Summed strength past which a directional signal becomes 강력.
const STRONG_THRESHOLD: f64 = 2.5;

/// Per-indicator direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "매수")]
    Buy,
    #[serde(rename = "매도")]
    Sell,
    #[serde(rename = "중립")]
    Neutral,
}

/// One indicator's vote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradingSignal {
    pub indicator: String,
    pub signal: SignalKind,
    pub strength: f64,
    pub value: f64,
    pub reason: String,
}

/// Aggregated signal block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TradingSignals {
    /// 강력매수 / 매수 / 중립 / 매도 / 강력매도
    pub overall_signal: String,
    pub confidence: f64,
    pub signals: Vec<TradingSignal>,
    pub entry_points: Vec<f64>,
    pub exit_points: Vec<f64>,
    pub stop_loss: Option<f64>,
    pub target_price: Option<f64>,
}

impl Default for TradingSignals {
    fn default() -> Self {
        Self {
            overall_signal: "중립".to_string(),
            confidence: 0.0,
            signals: Vec::new(),
            entry_points: Vec::new(),
            exit_points: Vec::new(),
            stop_loss: None,
            target_price: None,
        }
    }
}

/// Market-sentiment block from volume behavior and supply/demand flows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarketSentiment {
    /// 증가 / 감소 / 보통
    pub volume_trend: String,
    /// 강세 / 약세 / 중립
    pub price_volume_relation: String,
    pub foreign_flow: Option<f64>,
    pub institution_flow: Option<f64>,
}

impl Default for MarketSentiment {
    fn default() -> Self {
        Self {
            volume_trend: "보통".to_string(),
            price_volume_relation: "중립".to_string(),
            foreign_flow: None,
            institution_flow: None,
        }
    }
}

fn signal(indicator: &str, kind: SignalKind, strength: f64, value: f64, reason: &str) -> TradingSignal {
    TradingSignal {
        indicator: indicator.to_string(),
        signal: kind,
        strength,
        value,
        reason: reason.to_string(),
    }
}

/// Per-indicator rules → overall signal with stop-loss/target levels.
///
/// RSI votes ±0.8 at the 30/70 bands; MACD votes ±0.7 on a confirmed cross.
/// Overall: buy vs sell summed strengths with a 0.5 margin; 강력 past 2.5.
/// Buy: stop-loss 95%, target 110% (115% when 강력). Sell: target 95%
/// (90% when 강력).
pub fn generate_trading_signals(
    frame: &CandleFrame,
    indicators: &TechnicalIndicators,
) -> TradingSignals {
    let Some(current_price) = frame.last_close() else {
        return TradingSignals::default();
    };
    let mut signals = Vec::new();

    if let Some(rsi) = indicators.rsi {
        if rsi < 30.0 {
            signals.push(signal("RSI", SignalKind::Buy, 0.8, rsi, "과매도"));
        } else if rsi > 70.0 {
            signals.push(signal("RSI", SignalKind::Sell, 0.8, rsi, "과매수"));
        } else {
            signals.push(signal("RSI", SignalKind::Neutral, 0.3, rsi, "중립"));
        }
    }

    if let (Some(macd), Some(macd_signal)) = (indicators.macd, indicators.macd_signal) {
        let histogram = indicators.macd_histogram;
        if macd > macd_signal && histogram.map(|h| h > 0.0).unwrap_or(false) {
            signals.push(signal("MACD", SignalKind::Buy, 0.7, macd, "상승교차"));
        } else if macd < macd_signal && histogram.map(|h| h < 0.0).unwrap_or(false) {
            signals.push(signal("MACD", SignalKind::Sell, 0.7, macd, "하락교차"));
        } else {
            signals.push(signal("MACD", SignalKind::Neutral, 0.3, macd, "중립"));
        }
    }

    let buy_strength: f64 = signals
        .iter()
        .filter(|s| s.signal == SignalKind::Buy)
        .map(|s| s.strength)
        .sum();
    let sell_strength: f64 = signals
        .iter()
        .filter(|s| s.signal == SignalKind::Sell)
        .map(|s| s.strength)
        .sum();
    let neutral_strength: f64 = signals
        .iter()
        .filter(|s| s.signal == SignalKind::Neutral)
        .map(|s| s.strength)
        .sum();
    let total = buy_strength + sell_strength + neutral_strength;
    let confidence = if total > 0.0 {
        (buy_strength.max(sell_strength) / total * 100.0).round() / 100.0
    } else {
        0.0
    };

    let overall_signal = if buy_strength > sell_strength + SIGNAL_MARGIN {
        if buy_strength > STRONG_THRESHOLD {
            "강력매수"
        } else {
            "매수"
        }
    } else if sell_strength > buy_strength + SIGNAL_MARGIN {
        if sell_strength > STRONG_THRESHOLD {
            "강력매도"
        } else {
            "매도"
        }
    } else {
        "중립"
    };

    let mut entry_points = Vec::new();
    let mut exit_points = Vec::new();
    let mut stop_loss = None;
    let mut target_price = None;
    match overall_signal {
        "매수" | "강력매수" => {
            stop_loss = safe_float(current_price * 0.95);
            target_price = safe_float(
                current_price * if overall_signal == "매수" { 1.10 } else { 1.15 },
            );
            entry_points.push(current_price);
        }
        "매도" | "강력매도" => {
            target_price = safe_float(
                current_price * if overall_signal == "매도" { 0.95 } else { 0.90 },
            );
            exit_points.push(current_price);
        }
        _ => {}
    }

    TradingSignals {
        overall_signal: overall_signal.to_string(),
        confidence,
        signals,
        entry_points,
        exit_points,
        stop_loss,
        target_price,
    }
}

/// Reads one net-flow column (e.g. foreign/institution net buy) from
/// supply-demand records, summing the most recent `days` rows.
fn net_flow(records: &[serde_json::Map<String, Value>], field: &str, days: usize) -> Option<f64> {
    let values: Vec<f64> = records
        .iter()
        .rev()
        .take(days)
        .filter_map(|row| row.get(field).and_then(|v| v.as_f64()))
        .collect();
    if values.is_empty() {
        None
    } else {
        safe_float(values.iter().sum())
    }
}

/// Volume trend, price-volume relation and investor flows.
pub fn analyze_market_sentiment(
    frame: &CandleFrame,
    supply_demand: &[serde_json::Map<String, Value>],
) -> MarketSentiment {
    if frame.is_empty() {
        return MarketSentiment::default();
    }

    let volume: Vec<f64> = frame.volume.iter().cloned().filter(|v| v.is_finite()).collect();
    let volume_trend = if volume.len() >= 20 {
        let recent: f64 = volume.iter().rev().take(5).sum::<f64>() / 5.0;
        let average: f64 = volume.iter().rev().take(20).sum::<f64>() / 20.0;
        if recent > average * 1.2 {
            "증가"
        } else if recent < average * 0.8 {
            "감소"
        } else {
            "보통"
        }
    } else {
        "보통"
    };

    let price_volume_relation = if frame.len() >= 2 && volume.len() >= 2 {
        let price_up = frame.close[frame.len() - 1] > frame.close[frame.len() - 2];
        let volume_up = volume[volume.len() - 1] > volume[volume.len() - 2];
        match (price_up, volume_up) {
            (true, true) => "강세",
            (false, true) => "약세",
            _ => "중립",
        }
    } else {
        "중립"
    };

    MarketSentiment {
        volume_trend: volume_trend.to_string(),
        price_volume_relation: price_volume_relation.to_string(),
        foreign_flow: net_flow(supply_demand, "foreign_net_buy", 5),
        institution_flow: net_flow(supply_demand, "institution_net_buy", 5),
    }
}
