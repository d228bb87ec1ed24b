use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const BAR_INTERVAL_MS: u64 = 60_000;

/// One wall-clock minute of ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Start of the minute bucket (ms).
    pub timestamp: u64,
}

impl OhlcBar {
    fn open_at(bucket: u64, price: f64, volume: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            timestamp: bucket,
        }
    }

    fn absorb(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Sliding window of minute bars. Only the newest bar is ever mutated.
#[derive(Debug, Clone)]
pub struct BarSeries {
    bars: VecDeque<OhlcBar>,
    capacity: usize,
}

impl BarSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update(&mut self, price: f64, volume: f64, timestamp: u64) {
        let bucket = timestamp - timestamp % BAR_INTERVAL_MS;
        match self.bars.back_mut() {
            // Late ticks fold into the open bar rather than reopening a closed one.
            Some(bar) if bucket <= bar.timestamp => bar.absorb(price, volume),
            _ => {
                self.bars.push_back(OhlcBar::open_at(bucket, price, volume));
                if self.bars.len() > self.capacity {
                    self.bars.pop_front();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &OhlcBar> + ExactSizeIterator {
        self.bars.iter()
    }

    pub fn last(&self) -> Option<&OhlcBar> {
        self.bars.back()
    }

    /// True ranges of the newest `period` bars; the first bar of the window uses high-low
    /// when it has no predecessor.
    pub fn true_ranges(&self, period: usize) -> Vec<f64> {
        let start = self.bars.len().saturating_sub(period);
        let mut out = Vec::with_capacity(period);
        for i in start..self.bars.len() {
            let bar = &self.bars[i];
            let tr = match i.checked_sub(1).map(|p| self.bars[p].close) {
                Some(prev_close) => bar
                    .range()
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => bar.range(),
            };
            out.push(tr);
        }
        out
    }

    /// Volume-weighted typical price over the newest `period` bars.
    pub fn vwap(&self, period: usize) -> Option<f64> {
        let (pv, vol) = self
            .bars
            .iter()
            .rev()
            .take(period)
            .fold((0.0, 0.0), |(pv, vol), bar| {
                (pv + bar.typical_price() * bar.volume, vol + bar.volume)
            });
        (vol > 0.0).then(|| pv / vol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_in_same_minute_share_a_bar() {
        let mut series = BarSeries::new(200);
        series.update(100.0, 1.0, 60_000);
        series.update(102.0, 2.0, 60_500);
        series.update(99.0, 1.0, 119_999);

        assert_eq!(series.len(), 1);
        let bar = series.last().unwrap();
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.volume, 4.0);
        assert_eq!(bar.timestamp, 60_000);

        series.update(101.0, 1.0, 120_000);
        assert_eq!(series.len(), 2);
        assert_eq!(series.iter().next().unwrap().close, 99.0);
    }

    #[test]
    fn window_is_capped() {
        let mut series = BarSeries::new(3);
        for minute in 0..5u64 {
            series.update(100.0 + minute as f64, 1.0, minute * BAR_INTERVAL_MS);
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.iter().next().unwrap().open, 102.0);
    }

    #[test]
    fn true_range_uses_previous_close() {
        let mut series = BarSeries::new(10);
        series.update(100.0, 1.0, 0);
        series.update(110.0, 1.0, BAR_INTERVAL_MS);
        let trs = series.true_ranges(14);
        assert_eq!(trs, vec![0.0, 10.0]);
    }

    #[test]
    fn vwap_needs_volume() {
        let mut series = BarSeries::new(10);
        series.update(100.0, 0.0, 0);
        assert_eq!(series.vwap(20), None);
        series.update(100.0, 2.0, 10);
        assert_eq!(series.vwap(20), Some(100.0));
    }
}
