use crate::prediction::PredictionOutput;
use crate::types::Side;
use crate::utils::precision::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle into the portfolio's position arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Partial,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    /// Remaining size.
    pub size: Decimal,
    pub initial_size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub status: PositionStatus,
    /// Open time (ms).
    pub timestamp: u64,
    pub closed_at: Option<u64>,
    pub exit_reason: Option<String>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Marked value of the remaining size.
    pub fn exposure(&self) -> Decimal {
        round_money((self.size * self.current_price).abs())
    }

    /// P&L of `size` units moved from entry to `price`, in the position's direction.
    pub fn pnl_at(&self, price: Decimal, size: Decimal) -> Decimal {
        round_money((price - self.entry_price) * size * self.side.decimal_sign())
    }

    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = self.pnl_at(price, self.size);
    }

    /// Signed return of `price` relative to entry, positive when favourable.
    pub fn return_at(&self, price: f64) -> f64 {
        let entry = crate::utils::precision::to_f64(self.entry_price);
        if entry > 0.0 {
            (price - entry) / entry * self.side.sign()
        } else {
            0.0
        }
    }
}

/// Per-position state that only exists while the position is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionTracking {
    pub prediction: PredictionOutput,
    pub entry_time: u64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
    pub trailing_stop: Option<f64>,
    pub partial_tiers_taken: usize,
}

impl PositionTracking {
    pub fn new(prediction: PredictionOutput, entry_time: u64) -> Self {
        Self {
            prediction,
            entry_time,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
            trailing_stop: None,
            partial_tiers_taken: 0,
        }
    }

    pub fn record_excursion(&mut self, ret: f64) {
        if ret.is_finite() {
            self.max_favorable_excursion = self.max_favorable_excursion.max(ret);
            self.max_adverse_excursion = self.max_adverse_excursion.min(ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long() -> Position {
        Position {
            id: PositionId(0),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            size: dec!(1),
            initial_size: dec!(1),
            entry_price: dec!(100),
            current_price: dec!(100),
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            timestamp: 0,
            closed_at: None,
            exit_reason: None,
        }
    }

    #[test]
    fn mark_to_market_is_directional() {
        let mut pos = long();
        pos.mark(dec!(102));
        assert_eq!(pos.unrealized_pnl, dec!(2));

        pos.side = Side::Sell;
        pos.mark(dec!(102));
        assert_eq!(pos.unrealized_pnl, dec!(-2));
        assert!((pos.return_at(98.0) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn excursions_track_extremes() {
        let mut t = PositionTracking::new(PredictionOutput::neutral(), 0);
        for r in [0.01, -0.02, 0.005, f64::NAN] {
            t.record_excursion(r);
        }
        assert_eq!(t.max_favorable_excursion, 0.01);
        assert_eq!(t.max_adverse_excursion, -0.02);
    }
}
