//! Feature extraction: five bounded groups built from indicator sub-signals.

use crate::indicators::{IndicatorSet, MarketContext};
use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    Technical,
    Momentum,
    Volatility,
    MarketStructure,
    OrderbookDepth,
}

impl FeatureGroup {
    pub const ALL: [FeatureGroup; FEATURE_COUNT] = [
        FeatureGroup::Technical,
        FeatureGroup::Momentum,
        FeatureGroup::Volatility,
        FeatureGroup::MarketStructure,
        FeatureGroup::OrderbookDepth,
    ];

    pub fn index(self) -> usize {
        match self {
            FeatureGroup::Technical => 0,
            FeatureGroup::Momentum => 1,
            FeatureGroup::Volatility => 2,
            FeatureGroup::MarketStructure => 3,
            FeatureGroup::OrderbookDepth => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureGroup::Technical => "technical",
            FeatureGroup::Momentum => "momentum",
            FeatureGroup::Volatility => "volatility",
            FeatureGroup::MarketStructure => "market_structure",
            FeatureGroup::OrderbookDepth => "orderbook_depth",
        }
    }
}

/// One value per [`FeatureGroup`], indexed by [`FeatureGroup::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn get(&self, group: FeatureGroup) -> f64 {
        self.0[group.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureGroup, f64)> + '_ {
        FeatureGroup::ALL.iter().map(move |g| (*g, self.get(*g)))
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        self.sum() / FEATURE_COUNT as f64
    }

    pub fn mean_abs(&self) -> f64 {
        self.0.iter().map(|v| v.abs()).sum::<f64>() / FEATURE_COUNT as f64
    }

    pub fn max_abs(&self) -> f64 {
        self.0.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

fn bounded(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// `(a - b) / b` in percent, 0 when `b` is not positive.
fn pct_diff(a: f64, b: f64) -> f64 {
    if b > 0.0 {
        (a - b) / b * 100.0
    } else {
        0.0
    }
}

fn signum_or_zero(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub fn extract(ind: &IndicatorSet, ctx: &MarketContext, imbalance: f64) -> FeatureVector {
    let price = ind.price;
    let ema_spread = pct_diff(ind.ema_9, ind.ema_21);

    let technical = {
        let vs_sma = (pct_diff(price, ind.sma_20) / 0.5).tanh();
        let macd_bps = if price > 0.0 { ind.macd_histogram / price * 10_000.0 } else { 0.0 };
        let macd = (macd_bps / 5.0).tanh();
        let cross = (ema_spread / 0.5).tanh();
        0.3 * vs_sma + 0.3 * macd + 0.4 * cross
    };

    let momentum = {
        let rsi = (ind.rsi - 50.0) / 50.0;
        let stoch = (ind.stoch_k - 50.0) / 50.0;
        let williams = (ind.williams_r + 50.0) / 50.0;
        let roc = (ind.roc / 0.5).tanh();
        (rsi + stoch + williams + roc) / 4.0
    };

    let volatility = {
        let band_reversion = bounded((0.5 - ind.bollinger_position) * 2.0);
        let vwap_reversion = (pct_diff(ind.vwap, price) / 0.5).tanh();
        let breakout = (ind.volume_ratio - 1.0).tanh() * signum_or_zero(price - ind.sma_20);
        (band_reversion + vwap_reversion + breakout) / 3.0
    };

    let market_structure = {
        let channel = ind.resistance - ind.support;
        let placement = if channel > 0.0 {
            ((price - ind.support) / channel - 0.5) * 2.0
        } else {
            0.0
        };
        let vs_vwap = (pct_diff(price, ind.vwap) / 0.5).tanh();
        let trend = ind.trend_strength.tanh() * signum_or_zero(ema_spread);
        (placement + vs_vwap + trend) / 3.0
    };

    let orderbook_depth = {
        let imbalance = bounded(imbalance);
        0.6 * imbalance + 0.4 * (2.0 * imbalance * ctx.liquidity_score).tanh()
    };

    FeatureVector([
        bounded(technical),
        bounded(momentum),
        bounded(volatility),
        bounded(market_structure),
        bounded(orderbook_depth),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{MarketRegime, VolatilityRegime};

    fn ctx() -> MarketContext {
        MarketContext {
            volatility_regime: VolatilityRegime::Medium,
            market_regime: MarketRegime::SidewaysQuiet,
            market_hour: 12,
            liquidity_score: 0.5,
            spread_quality: 1.0,
        }
    }

    #[test]
    fn degenerate_indicators_stay_bounded() {
        let ind = IndicatorSet {
            price: f64::MAX,
            rsi: f64::NAN,
            volume_ratio: f64::INFINITY,
            ..IndicatorSet::default()
        };
        let features = extract(&ind, &ctx(), f64::NAN);
        assert!(features.0.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
    }

    #[test]
    fn bid_heavy_book_is_positive_depth_signal() {
        let ind = IndicatorSet {
            price: 100.0,
            sma_20: 100.0,
            ema_9: 100.0,
            ema_21: 100.0,
            vwap: 100.0,
            rsi: 50.0,
            stoch_k: 50.0,
            williams_r: -50.0,
            bollinger_position: 0.5,
            volume_ratio: 1.0,
            support: 99.0,
            resistance: 101.0,
            ..IndicatorSet::default()
        };
        let features = extract(&ind, &ctx(), 0.8);
        assert!(features.get(FeatureGroup::OrderbookDepth) > 0.5);
        assert_eq!(features.get(FeatureGroup::Technical), 0.0);
        assert_eq!(features.get(FeatureGroup::Momentum), 0.0);
        assert_eq!(features.get(FeatureGroup::MarketStructure), 0.0);
    }
}
