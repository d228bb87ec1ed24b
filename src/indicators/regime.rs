//! Volatility and trend regime classification.

use super::IndicatorSet;
use serde::{Deserialize, Serialize};

/// Trend strength (EMA spread, percent) above which a trend counts as strong.
pub const STRONG_TREND_THRESHOLD: f64 = 1.0;
/// Below this the market is treated as sideways.
pub const WEAK_TREND_THRESHOLD: f64 = 0.2;
/// Bollinger band width separating volatile from quiet ranges.
pub const VOLATILE_BAND_WIDTH: f64 = 0.04;

const SPREAD_BPS_CEILING: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    StrongBull,
    WeakBull,
    StrongBear,
    WeakBear,
    SidewaysVolatile,
    SidewaysQuiet,
}

impl MarketRegime {
    pub fn is_bullish(self) -> bool {
        matches!(self, MarketRegime::StrongBull | MarketRegime::WeakBull)
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarketRegime::StrongBull => "STRONG_BULL",
            MarketRegime::WeakBull => "WEAK_BULL",
            MarketRegime::StrongBear => "STRONG_BEAR",
            MarketRegime::WeakBear => "WEAK_BEAR",
            MarketRegime::SidewaysVolatile => "SIDEWAYS_VOLATILE",
            MarketRegime::SidewaysQuiet => "SIDEWAYS_QUIET",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub volatility_regime: VolatilityRegime,
    pub market_regime: MarketRegime,
    pub market_hour: u32,
    pub liquidity_score: f64,
    pub spread_quality: f64,
}

pub fn classify_volatility(ind: &IndicatorSet) -> VolatilityRegime {
    let ratio = if ind.price > 0.0 { ind.atr / ind.price } else { 0.0 };
    if ratio < 0.005 {
        VolatilityRegime::Low
    } else if ratio < 0.015 {
        VolatilityRegime::Medium
    } else {
        VolatilityRegime::High
    }
}

pub fn classify_market(ind: &IndicatorSet) -> MarketRegime {
    let strength = ind.trend_strength;
    let bullish = ind.ema_9 > ind.ema_21;
    let bearish = ind.ema_9 < ind.ema_21;

    if strength > STRONG_TREND_THRESHOLD && bullish {
        MarketRegime::StrongBull
    } else if strength > STRONG_TREND_THRESHOLD && bearish {
        MarketRegime::StrongBear
    } else if strength > WEAK_TREND_THRESHOLD && bullish {
        MarketRegime::WeakBull
    } else if strength > WEAK_TREND_THRESHOLD && bearish {
        MarketRegime::WeakBear
    } else if ind.bollinger_width > VOLATILE_BAND_WIDTH {
        MarketRegime::SidewaysVolatile
    } else {
        MarketRegime::SidewaysQuiet
    }
}

/// 1.0 for a locked book, 0.0 at or beyond 20 bps of spread.
pub fn spread_quality(bid: f64, ask: f64) -> f64 {
    let mid = (bid + ask) / 2.0;
    if mid <= 0.0 {
        return 0.0;
    }
    let spread_bps = (ask - bid) / mid * 10_000.0;
    1.0 - (spread_bps / SPREAD_BPS_CEILING).clamp(0.0, 1.0)
}

/// Current depth relative to its recent average; 0.5 means "typical".
pub fn liquidity_score(depth: f64, average_depth: Option<f64>) -> f64 {
    match average_depth {
        Some(avg) if avg > 0.0 => (0.5 * depth / avg).clamp(0.0, 1.0),
        _ => 0.5,
    }
}
