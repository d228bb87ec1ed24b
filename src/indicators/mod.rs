//! Rolling price/volume history and the technical indicators derived from it.
//!
//! State is a fold over the tick stream, so ticks for one instrument must arrive in order.
//! Indicators are recomputed wholesale from the retained window on every call to
//! [`IndicatorEngine::calculate`].

pub mod bars;
pub mod regime;

pub use bars::{BarSeries, OhlcBar};
pub use regime::{MarketContext, MarketRegime, VolatilityRegime};

use crate::types::PriceTick;
use chrono::{TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 200;
pub const MIN_SAMPLES: usize = 20;
const DEPTH_WINDOW: usize = 50;

const RSI_PERIOD: usize = 14;
const STOCH_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const BB_PERIOD: usize = 20;
const BB_STD_DEV: f64 = 2.0;
const MACD_SIGNAL_PERIOD: usize = 9;
const ROC_PERIOD: usize = 10;
const LEVELS_WINDOW: usize = 20;

/// Snapshot of every indicator for the newest sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub price: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_9: f64,
    pub ema_12: f64,
    pub ema_21: f64,
    pub ema_26: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub rsi: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub williams_r: f64,
    pub bollinger_upper: f64,
    pub bollinger_middle: f64,
    pub bollinger_lower: f64,
    /// (upper - lower) / middle
    pub bollinger_width: f64,
    /// Position of price inside the bands, 0 = lower, 1 = upper.
    pub bollinger_position: f64,
    pub atr: f64,
    pub volume_sma: f64,
    pub volume_ratio: f64,
    pub vwap: f64,
    pub support: f64,
    pub resistance: f64,
    /// |EMA9 - EMA21| / EMA21, percent.
    pub trend_strength: f64,
    /// Rate of change over 10 samples, percent.
    pub roc: f64,
    pub order_book_pressure: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BookState {
    bid: f64,
    ask: f64,
    depth: f64,
    pressure: f64,
    timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    macd_history: VecDeque<f64>,
    depth_history: VecDeque<f64>,
    bars: BarSeries,
    book: Option<BookState>,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self {
            prices: VecDeque::with_capacity(HISTORY_CAPACITY),
            volumes: VecDeque::with_capacity(HISTORY_CAPACITY),
            macd_history: VecDeque::with_capacity(HISTORY_CAPACITY),
            depth_history: VecDeque::with_capacity(DEPTH_WINDOW),
            bars: BarSeries::new(HISTORY_CAPACITY),
            book: None,
        }
    }

    /// Feeds one validated tick: mid-price and top-of-book depth.
    pub fn on_tick(&mut self, tick: &PriceTick) {
        let depth = tick.total_volume();
        self.book = Some(BookState {
            bid: tick.bid,
            ask: tick.ask,
            depth,
            pressure: tick.imbalance(),
            timestamp: tick.timestamp,
        });
        push_capped(&mut self.depth_history, depth, DEPTH_WINDOW);
        self.push(tick.mid, depth, tick.timestamp);
    }

    /// Appends a `(price, volume)` sample. Non-finite or non-positive prices are ignored.
    pub fn push(&mut self, price: f64, volume: f64, timestamp: u64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let volume = if volume.is_finite() { volume.max(0.0) } else { 0.0 };

        push_capped(&mut self.prices, price, HISTORY_CAPACITY);
        push_capped(&mut self.volumes, volume, HISTORY_CAPACITY);
        self.bars.update(price, volume, timestamp);

        if self.prices.len() >= 2 {
            let prices = self.price_slice();
            let macd = ema(&prices, 12) - ema(&prices, 26);
            push_capped(&mut self.macd_history, macd, HISTORY_CAPACITY);
        }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn bars(&self) -> &BarSeries {
        &self.bars
    }

    pub fn last_price(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    fn price_slice(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }

    /// `None` until at least [`MIN_SAMPLES`] prices are held.
    pub fn calculate(&self) -> Option<IndicatorSet> {
        if self.prices.len() < MIN_SAMPLES {
            return None;
        }
        let prices = self.price_slice();
        let volumes: Vec<f64> = self.volumes.iter().copied().collect();
        let price = *prices.last()?;

        let ema_9 = ema(&prices, 9);
        let ema_12 = ema(&prices, 12);
        let ema_21 = ema(&prices, 21);
        let ema_26 = ema(&prices, 26);

        let macd = ema_12 - ema_26;
        let macd_hist: Vec<f64> = self.macd_history.iter().copied().collect();
        let macd_signal = if macd_hist.len() < MACD_SIGNAL_PERIOD {
            mean(&macd_hist)
        } else {
            ema(&macd_hist, MACD_SIGNAL_PERIOD)
        };

        let (bollinger_upper, bollinger_middle, bollinger_lower) = bollinger(&prices, BB_PERIOD, BB_STD_DEV);
        let band = bollinger_upper - bollinger_lower;
        let bollinger_width = if bollinger_middle > 0.0 { band / bollinger_middle } else { 0.0 };
        let bollinger_position = if band > 0.0 { (price - bollinger_lower) / band } else { 0.5 };

        let stoch_k = stochastic_k(&prices, prices.len(), STOCH_PERIOD);
        let stoch_d = {
            let ks: Vec<f64> = (0..3)
                .filter_map(|back| prices.len().checked_sub(back))
                .filter(|end| *end >= 1)
                .map(|end| stochastic_k(&prices, end, STOCH_PERIOD))
                .collect();
            mean(&ks)
        };

        let volume_sma = sma(&volumes, 20);
        let volume_ratio = match volumes.last() {
            Some(v) if volume_sma > 0.0 => v / volume_sma,
            _ => 1.0,
        };

        let recent = tail(&prices, LEVELS_WINDOW);
        let support = recent.iter().copied().fold(f64::INFINITY, f64::min);
        let resistance = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let trend_strength = if ema_21 > 0.0 { (ema_9 - ema_21).abs() / ema_21 * 100.0 } else { 0.0 };

        let roc = prices
            .len()
            .checked_sub(ROC_PERIOD + 1)
            .map(|i| prices[i])
            .filter(|past| *past > 0.0)
            .map_or(0.0, |past| (price - past) / past * 100.0);

        Some(IndicatorSet {
            price,
            sma_20: sma(&prices, 20),
            sma_50: sma(&prices, 50),
            ema_9,
            ema_12,
            ema_21,
            ema_26,
            macd,
            macd_signal,
            macd_histogram: macd - macd_signal,
            rsi: rsi(&prices, RSI_PERIOD),
            stoch_k,
            stoch_d,
            williams_r: williams_r(&prices, STOCH_PERIOD),
            bollinger_upper,
            bollinger_middle,
            bollinger_lower,
            bollinger_width,
            bollinger_position,
            atr: self.atr(&prices),
            volume_sma,
            volume_ratio,
            vwap: self.bars.vwap(LEVELS_WINDOW).unwrap_or(price),
            support,
            resistance,
            trend_strength,
            roc,
            order_book_pressure: self.book.map_or(0.0, |b| b.pressure),
        })
    }

    /// Bar ATR, falling back to mean absolute tick change while bars are too few to range.
    fn atr(&self, prices: &[f64]) -> f64 {
        if self.bars.len() >= 2 {
            let bar_atr = mean(&self.bars.true_ranges(ATR_PERIOD));
            if bar_atr > 0.0 {
                return bar_atr;
            }
        }
        let recent = tail(prices, ATR_PERIOD + 1);
        let changes: Vec<f64> = recent.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        mean(&changes)
    }

    /// Builds the market context for an indicator snapshot and the latest book state.
    pub fn context(&self, ind: &IndicatorSet) -> MarketContext {
        let (spread_quality, liquidity, hour) = match self.book {
            Some(book) => {
                let history: Vec<f64> = self.depth_history.iter().copied().collect();
                let avg = (!history.is_empty()).then(|| mean(&history));
                let hour = Utc
                    .timestamp_millis_opt(book.timestamp as i64)
                    .single()
                    .map_or(0, |dt| dt.hour());
                (
                    regime::spread_quality(book.bid, book.ask),
                    regime::liquidity_score(book.depth, avg),
                    hour,
                )
            }
            None => (1.0, 0.5, 0),
        };

        MarketContext {
            volatility_regime: regime::classify_volatility(ind),
            market_regime: regime::classify_market(ind),
            market_hour: hour,
            liquidity_score: liquidity,
            spread_quality,
        }
    }
}

fn push_capped(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Mean of the newest `period` values (all values when fewer are held).
pub fn sma(values: &[f64], period: usize) -> f64 {
    mean(tail(values, period))
}

/// EMA seeded with the first sample and folded over the whole window.
pub fn ema(values: &[f64], period: usize) -> f64 {
    let Some(first) = values.first() else {
        return 0.0;
    };
    let k = 2.0 / (period as f64 + 1.0);
    values[1..].iter().fold(*first, |acc, v| v * k + acc * (1.0 - k))
}

/// RSI from simple average gain/loss over the last `period` changes.
pub fn rsi(values: &[f64], period: usize) -> f64 {
    let recent = tail(values, period + 1);
    if recent.len() < 2 {
        return 50.0;
    }
    let (gains, losses) = recent.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (g + change, l)
        } else {
            (g, l - change)
        }
    });
    let n = (recent.len() - 1) as f64;
    let avg_gain = gains / n;
    let avg_loss = losses / n;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Middle band plus/minus `k` population standard deviations.
pub fn bollinger(values: &[f64], period: usize, k: f64) -> (f64, f64, f64) {
    let window = tail(values, period);
    let middle = mean(window);
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / window.len().max(1) as f64;
    let sd = variance.sqrt();
    (middle + k * sd, middle, middle - k * sd)
}

/// %K of the window ending just before index `end`.
fn stochastic_k(values: &[f64], end: usize, period: usize) -> f64 {
    let window = tail(&values[..end], period);
    let Some(close) = window.last() else {
        return 50.0;
    };
    let low = window.iter().copied().fold(f64::INFINITY, f64::min);
    let high = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if high > low {
        (close - low) / (high - low) * 100.0
    } else {
        50.0
    }
}

pub fn williams_r(values: &[f64], period: usize) -> f64 {
    let window = tail(values, period);
    let Some(close) = window.last() else {
        return -50.0;
    };
    let low = window.iter().copied().fold(f64::INFINITY, f64::min);
    let high = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if high > low {
        (high - close) / (high - low) * -100.0
    } else {
        -50.0
    }
}
